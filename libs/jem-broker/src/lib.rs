// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! jem broker - share buffer objects across processes by reference.
//!
//! A process attaches a descriptor for a shared buffer (typically a DMA-BUF);
//! the broker keeps its own reference under that descriptor number. Any other
//! process can then ask for a fresh descriptor to the same buffer without
//! copying it. Release drops the broker's reference; flush drops them all.
//!
//! ```no_run
//! use jem_broker::{BrokerConfig, BrokerDevice, Command, ProcessDescriptorTable};
//!
//! # fn main() -> jem_broker::Result<()> {
//! # let fd = 3;
//! let device = BrokerDevice::load(BrokerConfig::resolve(None)?);
//! let session = device.open(ProcessDescriptorTable::new());
//! session.dispatch(Command::Attach, fd as u64)?;
//! let shared = session.dispatch(Command::Duplicate, fd as u64)?;
//! # let _ = shared;
//! device.unload();
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod device;
pub mod dispatch;
mod error;
pub mod logging;
pub mod registry;
pub mod table;

pub use command::Command;
pub use config::BrokerConfig;
pub use device::{BrokerDevice, BrokerStats, Session};
pub use dispatch::CommandDispatcher;
pub use error::{BrokerError, Result, STATUS_FAILURE};
pub use registry::{EntryInfo, HandleRegistry, Rejected};
pub use table::DescriptorTable;
#[cfg(unix)]
pub use table::{ProcessDescriptorTable, SharedFile};

/// Process-local descriptor number. Also the registry key.
pub type RawDescriptor = i32;

/// Broker version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
