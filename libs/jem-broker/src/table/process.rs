// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The current process's file-descriptor table.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};

use super::DescriptorTable;
use crate::{BrokerError, RawDescriptor, Result};

/// Owning reference to an open file description (a DMA-BUF, memfd, ...).
///
/// Holding the private descriptor keeps the underlying buffer alive even if
/// the process closes the descriptor it attached with.
#[derive(Debug)]
pub struct SharedFile {
    fd: OwnedFd,
    origin: RawDescriptor,
}

impl SharedFile {
    /// Descriptor the reference was acquired from.
    pub fn origin(&self) -> RawDescriptor {
        self.origin
    }
}

impl AsFd for SharedFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for SharedFile {
    fn as_raw_fd(&self) -> RawDescriptor {
        self.fd.as_raw_fd()
    }
}

/// [`DescriptorTable`] over the calling process's own descriptors.
///
/// References are private close-on-exec duplicates. A duplicate handed back
/// through [`install`](DescriptorTable::install) has close-on-exec cleared
/// and is owned by the caller, so it survives an `exec` into a consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessDescriptorTable;

impl ProcessDescriptorTable {
    pub fn new() -> Self {
        Self
    }
}

impl DescriptorTable for ProcessDescriptorTable {
    type Resource = SharedFile;

    fn acquire(&self, descriptor: RawDescriptor) -> Result<SharedFile> {
        if descriptor < 0 {
            return Err(BrokerError::ResourceUnavailable {
                descriptor,
                reason: "negative descriptor".into(),
            });
        }

        // SAFETY: F_DUPFD_CLOEXEC only reads the descriptor number; a closed
        // or invalid descriptor fails with EBADF.
        let fd = unsafe { libc::fcntl(descriptor, libc::F_DUPFD_CLOEXEC, 0) };
        if fd < 0 {
            return Err(BrokerError::from_errno(
                descriptor,
                std::io::Error::last_os_error(),
            ));
        }

        tracing::trace!(
            "[Broker] Acquired private fd {} for descriptor {}",
            fd,
            descriptor
        );

        Ok(SharedFile {
            // SAFETY: fcntl just allocated `fd` and nothing else owns it.
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            origin: descriptor,
        })
    }

    fn duplicate(&self, resource: &SharedFile) -> Result<SharedFile> {
        let fd = resource
            .fd
            .try_clone()
            .map_err(|e| BrokerError::from_errno(resource.origin, e))?;
        Ok(SharedFile {
            fd,
            origin: resource.origin,
        })
    }

    fn install(&self, resource: SharedFile) -> Result<RawDescriptor> {
        // The duplicate already occupies a slot in this table. Private
        // references are close-on-exec; the caller's descriptor is not.
        // SAFETY: F_SETFD only touches the descriptor flags of an fd we own.
        if unsafe { libc::fcntl(resource.fd.as_raw_fd(), libc::F_SETFD, 0) } < 0 {
            let err = std::io::Error::last_os_error();
            let origin = resource.origin;
            drop(resource);
            return Err(BrokerError::from_errno(origin, err));
        }

        Ok(resource.fd.into_raw_fd())
    }
}
