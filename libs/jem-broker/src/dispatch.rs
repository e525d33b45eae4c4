// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Command dispatcher.
//!
//! Turns a decoded command and its argument into one registry operation
//! against the caller's descriptor table, and the outcome into a status code.

use crate::command::Command;
use crate::error::STATUS_FAILURE;
use crate::registry::HandleRegistry;
use crate::table::DescriptorTable;
use crate::{BrokerError, RawDescriptor, Result};

/// Dispatcher bound to one caller's descriptor table.
pub struct CommandDispatcher<T: DescriptorTable> {
    registry: HandleRegistry<T::Resource>,
    table: T,
}

impl<T: DescriptorTable> CommandDispatcher<T> {
    /// Create a dispatcher over a shared registry.
    pub fn new(registry: HandleRegistry<T::Resource>, table: T) -> Self {
        Self { registry, table }
    }

    pub fn registry(&self) -> &HandleRegistry<T::Resource> {
        &self.registry
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Run `command` and return its non-negative result.
    ///
    /// Attach echoes the key, Duplicate returns the new descriptor, Release
    /// and FlushAll return 0.
    pub fn dispatch(&self, command: Command, argument: u64) -> Result<i64> {
        tracing::trace!("[Broker] {} (arg={:#x})", command, argument);

        match command {
            Command::Attach => self.attach(descriptor_argument(argument)?).map(i64::from),
            Command::Release => self.release(descriptor_argument(argument)?).map(|()| 0),
            Command::Duplicate => self
                .duplicate(descriptor_argument(argument)?)
                .map(i64::from),
            Command::FlushAll => {
                self.flush_all();
                Ok(0)
            }
        }
    }

    /// Decode `opcode`, dispatch, and fold the outcome into a status code.
    pub fn handle_ioctl(&self, opcode: u32, argument: u64) -> i64 {
        let outcome =
            Command::try_from(opcode).and_then(|command| self.dispatch(command, argument));

        match outcome {
            Ok(value) => value,
            Err(BrokerError::UnknownCommand(opcode)) => {
                tracing::warn!("[Broker] Unknown command opcode {:#x}", opcode);
                STATUS_FAILURE
            }
            Err(BrokerError::InvalidArgument(argument)) => {
                tracing::warn!(
                    "[Broker] Rejected argument {:#x} for opcode {:#x}",
                    argument,
                    opcode
                );
                STATUS_FAILURE
            }
            Err(e) => e.status_code(),
        }
    }

    /// Register the caller's `descriptor` under its own number.
    ///
    /// The reference acquired from the descriptor table is either committed to
    /// the registry or dropped before this returns.
    pub fn attach(&self, descriptor: RawDescriptor) -> Result<RawDescriptor> {
        if self.registry.contains(descriptor) {
            tracing::warn!(
                "[Broker] ATTACH_DMABUF: an entry already exists for fd ({})",
                descriptor
            );
            return Err(BrokerError::AlreadyExists(descriptor));
        }

        let resource = self.table.acquire(descriptor).inspect_err(|e| {
            tracing::error!(
                "[Broker] ATTACH_DMABUF: acquire failed for fd ({}): {}",
                descriptor,
                e
            );
        })?;

        match self.registry.insert(descriptor, resource) {
            Ok(()) => {
                tracing::info!("[Broker] ATTACH_DMABUF OK (ret={})", descriptor);
                Ok(descriptor)
            }
            Err(rejected) => {
                let (reason, resource) = rejected.into_parts();
                drop(resource);
                match &reason {
                    BrokerError::AlreadyExists(_) => tracing::warn!(
                        "[Broker] ATTACH_DMABUF: lost insert race for fd ({}), reference released",
                        descriptor
                    ),
                    other => tracing::error!(
                        "[Broker] ATTACH_DMABUF: insert failed for fd ({}), reference released: {}",
                        descriptor,
                        other
                    ),
                }
                Err(reason)
            }
        }
    }

    /// Drop the entry registered under `key`.
    pub fn release(&self, key: RawDescriptor) -> Result<()> {
        let resource = self.registry.remove(key).inspect_err(|_| {
            tracing::warn!(
                "[Broker] RELEASE_DMABUF: entry does not exist for fd ({})",
                key
            );
        })?;
        drop(resource);

        tracing::info!("[Broker] RELEASE_DMABUF OK (fd={})", key);
        Ok(())
    }

    /// Install a new descriptor for the entry under `key` in the caller's table.
    ///
    /// The entry itself is left untouched.
    pub fn duplicate(&self, key: RawDescriptor) -> Result<RawDescriptor> {
        let resource = self
            .registry
            .duplicate_with(key, |resource| self.table.duplicate(resource))
            .inspect_err(|e| match e {
                BrokerError::NotFound(_) => tracing::warn!(
                    "[Broker] CREATE_FD: entry does not exist for fd ({})",
                    key
                ),
                other => tracing::error!("[Broker] CREATE_FD FAIL (fd={}): {}", key, other),
            })?;

        let descriptor = self.table.install(resource).inspect_err(|e| {
            tracing::error!("[Broker] CREATE_FD FAIL (fd={}): {}", key, e);
        })?;

        tracing::info!("[Broker] CREATE_FD OK (ret={})", descriptor);
        Ok(descriptor)
    }

    /// Drop every entry. Never fails; returns the number of entries released.
    pub fn flush_all(&self) -> usize {
        let released = self.registry.flush_all();
        tracing::info!("[Broker] FLUSH_ALL OK ({} entries released)", released);
        released
    }
}

impl<T: DescriptorTable + std::fmt::Debug> std::fmt::Debug for CommandDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("registry", &self.registry)
            .field("table", &self.table)
            .finish()
    }
}

fn descriptor_argument(argument: u64) -> Result<RawDescriptor> {
    RawDescriptor::try_from(argument).map_err(|_| BrokerError::InvalidArgument(argument))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{JEM_ATTACH_DMABUF, JEM_CREATE_FD, JEM_FLUSH_ALL, JEM_RELEASE_DMABUF};
    use crate::table::sim::{SharedBuffer, SimulatedProcess};

    fn dispatcher() -> CommandDispatcher<SimulatedProcess> {
        CommandDispatcher::new(HandleRegistry::new(), SimulatedProcess::new(100))
    }

    #[test]
    fn test_attach_release_roundtrip() {
        let dispatcher = dispatcher();
        let buffer = SharedBuffer::new(4096);
        let fd = dispatcher.table().open(&buffer).unwrap();

        assert_eq!(dispatcher.attach(fd).unwrap(), fd);
        assert_eq!(buffer.ref_count(), 2);

        dispatcher.release(fd).unwrap();
        assert_eq!(buffer.ref_count(), 1);
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_attach_twice_keeps_count() {
        let dispatcher = dispatcher();
        let buffer = SharedBuffer::new(4096);
        let fd = dispatcher.table().open(&buffer).unwrap();

        dispatcher.attach(fd).unwrap();
        assert!(matches!(
            dispatcher.attach(fd),
            Err(BrokerError::AlreadyExists(k)) if k == fd
        ));
        assert_eq!(buffer.ref_count(), 2);
    }

    #[test]
    fn test_attach_rollback_on_full_registry() {
        let dispatcher = CommandDispatcher::new(
            HandleRegistry::with_max_entries(Some(1)),
            SimulatedProcess::new(100),
        );
        let buffer = SharedBuffer::new(64);
        let first = dispatcher.table().open(&buffer).unwrap();
        let second = dispatcher.table().open(&buffer).unwrap();

        dispatcher.attach(first).unwrap();
        let err = dispatcher.attach(second).unwrap_err();
        assert!(matches!(err, BrokerError::AllocationFailure(_)));
        assert_eq!(err.status_code(), -i64::from(libc::ENOMEM));
        // Two open descriptors plus the one registered entry.
        assert_eq!(buffer.ref_count(), 3);
    }

    #[test]
    fn test_attach_unresolvable_descriptor() {
        let dispatcher = dispatcher();
        assert!(matches!(
            dispatcher.attach(12),
            Err(BrokerError::ResourceUnavailable { descriptor: 12, .. })
        ));
        assert!(dispatcher.registry().is_empty());
    }

    #[test]
    fn test_duplicate_exhausted_rolls_back() {
        let dispatcher = CommandDispatcher::new(
            HandleRegistry::new(),
            SimulatedProcess::with_limit(100, 1),
        );
        let buffer = SharedBuffer::new(64);
        let fd = dispatcher.table().open(&buffer).unwrap();
        dispatcher.attach(fd).unwrap();

        let err = dispatcher.duplicate(fd).unwrap_err();
        assert!(matches!(err, BrokerError::DescriptorExhausted(_)));
        assert_eq!(buffer.ref_count(), 2);
        assert!(dispatcher.registry().contains(fd));
    }

    #[test]
    fn test_ioctl_status_codes() {
        let dispatcher = dispatcher();
        let buffer = SharedBuffer::new(64);
        let fd = dispatcher.table().open(&buffer).unwrap();
        let arg = fd as u64;

        assert_eq!(dispatcher.handle_ioctl(JEM_ATTACH_DMABUF, arg), i64::from(fd));
        assert_eq!(dispatcher.handle_ioctl(JEM_ATTACH_DMABUF, arg), -1);

        let dup = dispatcher.handle_ioctl(JEM_CREATE_FD, arg);
        assert!(dup >= 0);
        assert_ne!(dup, i64::from(fd));

        assert_eq!(dispatcher.handle_ioctl(JEM_RELEASE_DMABUF, arg), 0);
        assert_eq!(dispatcher.handle_ioctl(JEM_RELEASE_DMABUF, arg), -1);
        assert_eq!(dispatcher.handle_ioctl(JEM_CREATE_FD, arg), -1);
        assert_eq!(dispatcher.handle_ioctl(JEM_FLUSH_ALL, 0), 0);
        assert_eq!(dispatcher.handle_ioctl(0x4a7f, arg), -1);
    }

    #[test]
    fn test_argument_out_of_range() {
        let dispatcher = dispatcher();
        assert!(matches!(
            dispatcher.dispatch(Command::Release, u64::MAX),
            Err(BrokerError::InvalidArgument(u64::MAX))
        ));
        assert_eq!(dispatcher.handle_ioctl(JEM_ATTACH_DMABUF, 1 << 40), -1);
        // FlushAll ignores its argument.
        assert_eq!(dispatcher.dispatch(Command::FlushAll, u64::MAX).unwrap(), 0);
    }
}
