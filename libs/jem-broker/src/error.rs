// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error taxonomy for broker commands and their command-channel status codes.

use thiserror::Error;

use crate::RawDescriptor;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Entry already exists for descriptor {0}")]
    AlreadyExists(RawDescriptor),

    #[error("No entry registered for descriptor {0}")]
    NotFound(RawDescriptor),

    #[error("Descriptor {descriptor} does not resolve to a shareable resource: {reason}")]
    ResourceUnavailable {
        descriptor: RawDescriptor,
        reason: String,
    },

    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    #[error("No free descriptor in the calling process: {0}")]
    DescriptorExhausted(String),

    #[error("Unknown command opcode {0:#x}")]
    UnknownCommand(u32),

    #[error("Argument {0:#x} is not a valid descriptor")]
    InvalidArgument(u64),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Generic failure status returned on the command channel.
pub const STATUS_FAILURE: i64 = -1;

impl BrokerError {
    /// Negative status code reported back through the command channel.
    ///
    /// Allocation and descriptor-table exhaustion keep their errno so callers
    /// can tell resource pressure apart from a bad key. Everything else
    /// collapses to `-1`.
    pub fn status_code(&self) -> i64 {
        match self {
            Self::AllocationFailure(_) => -i64::from(libc::ENOMEM),
            Self::DescriptorExhausted(_) => -i64::from(libc::EMFILE),
            Self::AlreadyExists(_)
            | Self::NotFound(_)
            | Self::ResourceUnavailable { .. }
            | Self::UnknownCommand(_)
            | Self::InvalidArgument(_)
            | Self::Configuration(_)
            | Self::Io(_) => STATUS_FAILURE,
        }
    }

    /// Map an errno reported by a descriptor-table call on `descriptor`.
    pub(crate) fn from_errno(descriptor: RawDescriptor, err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) => Self::DescriptorExhausted(err.to_string()),
            Some(libc::ENOMEM) => Self::AllocationFailure(err.to_string()),
            _ => Self::ResourceUnavailable {
                descriptor,
                reason: err.to_string(),
            },
        }
    }
}
