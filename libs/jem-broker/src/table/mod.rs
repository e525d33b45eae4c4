// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Descriptor-table collaborators.
//!
//! The broker never looks inside a shared buffer. It asks a [`DescriptorTable`]
//! for an owning reference to whatever a caller's descriptor names, asks it to
//! bump that reference, and asks it to install a reference as a fresh
//! descriptor. Dropping a resource is the release.
//!
//! - [`ProcessDescriptorTable`] backs the broker with the current process's
//!   real file-descriptor table (unix only).
//! - [`sim`] provides in-process buffers and descriptor tables so several
//!   "processes" can share one broker and reference counts stay observable.

#[cfg(unix)]
mod process;
pub mod sim;

#[cfg(unix)]
pub use process::{ProcessDescriptorTable, SharedFile};

use crate::{RawDescriptor, Result};

/// The calling context's descriptor table.
///
/// Implementations manage their own locking. [`duplicate`](Self::duplicate)
/// runs while the registry lock is held, so it must complete in bounded time
/// and must not call back into the broker.
pub trait DescriptorTable: Send + Sync {
    /// Owning reference to a shared buffer object. Dropping it releases the
    /// reference exactly once.
    type Resource: Send + 'static;

    /// Resolve a descriptor in this table to a new owning reference.
    fn acquire(&self, descriptor: RawDescriptor) -> Result<Self::Resource>;

    /// Take an additional reference to an already-held resource.
    fn duplicate(&self, resource: &Self::Resource) -> Result<Self::Resource>;

    /// Hand a reference over to this table as a newly allocated descriptor.
    ///
    /// On failure the reference is dropped before returning.
    fn install(&self, resource: Self::Resource) -> Result<RawDescriptor>;
}
