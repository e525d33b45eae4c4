// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Broker device lifecycle.
//!
//! A [`BrokerDevice`] lives from load to unload and owns the handle registry.
//! Each [`open`](BrokerDevice::open) yields a [`Session`] that binds one
//! caller's descriptor table to that registry. Sessions own no resources.
//! Unloading flushes every entry before the device goes away.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::command::Command;
use crate::config::BrokerConfig;
use crate::dispatch::CommandDispatcher;
use crate::registry::{EntryInfo, HandleRegistry};
use crate::table::DescriptorTable;
use crate::Result;

/// Point-in-time view of a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerStats {
    pub device_name: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub entries: usize,
    pub open_sessions: usize,
    pub uptime_secs: u64,
}

/// A loaded broker device.
pub struct BrokerDevice<R> {
    config: BrokerConfig,
    registry: HandleRegistry<R>,
    loaded_at: Instant,
    sessions: Arc<SessionCounter>,
    unloaded: bool,
}

#[derive(Default)]
struct SessionCounter {
    open: AtomicUsize,
    next_id: AtomicU64,
}

impl<R> BrokerDevice<R> {
    /// Load the device with an empty registry.
    pub fn load(config: BrokerConfig) -> Self {
        tracing::info!(
            "[Broker] Loading device '{}' v{}.{} (max_entries={:?})",
            config.device_name,
            config.version_major,
            config.version_minor,
            config.max_entries
        );

        Self {
            registry: HandleRegistry::with_max_entries(config.max_entries),
            config,
            loaded_at: Instant::now(),
            sessions: Arc::new(SessionCounter::default()),
            unloaded: false,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandleRegistry<R> {
        &self.registry
    }

    /// Open a session for a caller whose descriptors live in `table`.
    pub fn open<T>(&self, table: T) -> Session<T>
    where
        T: DescriptorTable<Resource = R>,
    {
        let id = self.sessions.next_id.fetch_add(1, Ordering::Relaxed);
        let open = self.sessions.open.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            "[Broker] open '{}' (session {}, {} open)",
            self.config.device_name,
            id,
            open
        );

        Session {
            id,
            device_name: self.config.device_name.clone(),
            opened_at: Instant::now(),
            dispatcher: CommandDispatcher::new(self.registry.clone(), table),
            sessions: Arc::clone(&self.sessions),
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.open.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.loaded_at.elapsed().as_secs()
    }

    pub fn entries(&self) -> Vec<EntryInfo> {
        self.registry.snapshot()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            device_name: self.config.device_name.clone(),
            version_major: self.config.version_major,
            version_minor: self.config.version_minor,
            entries: self.registry.len(),
            open_sessions: self.open_sessions(),
            uptime_secs: self.uptime_secs(),
        }
    }

    /// Flush every entry and tear the device down.
    ///
    /// Returns the number of entries released by the flush.
    pub fn unload(mut self) -> usize {
        self.teardown()
    }

    fn teardown(&mut self) -> usize {
        if self.unloaded {
            return 0;
        }
        self.unloaded = true;

        let released = self.registry.flush_all();
        let open = self.open_sessions();
        if open > 0 {
            tracing::warn!(
                "[Broker] Unloading '{}' with {} session(s) still open",
                self.config.device_name,
                open
            );
        }
        tracing::info!(
            "[Broker] Unloaded device '{}' ({} entries released)",
            self.config.device_name,
            released
        );
        released
    }
}

impl<R> Drop for BrokerDevice<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<R> std::fmt::Debug for BrokerDevice<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerDevice")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

/// One open handle on the device.
pub struct Session<T: DescriptorTable> {
    id: u64,
    device_name: String,
    opened_at: Instant,
    dispatcher: CommandDispatcher<T>,
    sessions: Arc<SessionCounter>,
}

impl<T: DescriptorTable> Session<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<T> {
        &self.dispatcher
    }

    /// The caller's descriptor table.
    pub fn table(&self) -> &T {
        self.dispatcher.table()
    }

    pub fn dispatch(&self, command: Command, argument: u64) -> Result<i64> {
        self.dispatcher.dispatch(command, argument)
    }

    /// Multiplexed command channel: opcode and argument in, status out.
    pub fn ioctl(&self, opcode: u32, argument: u64) -> i64 {
        self.dispatcher.handle_ioctl(opcode, argument)
    }
}

impl<T: DescriptorTable> Drop for Session<T> {
    fn drop(&mut self) {
        let open = self.sessions.open.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::info!(
            "[Broker] release '{}' (session {}, {} open)",
            self.device_name,
            self.id,
            open
        );
    }
}

impl<T: DescriptorTable> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("device_name", &self.device_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{JEM_ATTACH_DMABUF, JEM_FLUSH_ALL};
    use crate::table::sim::{BufferRef, SharedBuffer, SimulatedProcess};

    #[test]
    fn test_open_and_close_counts() {
        let device: BrokerDevice<BufferRef> = BrokerDevice::load(BrokerConfig::default());
        let first = device.open(SimulatedProcess::new(1));
        let second = device.open(SimulatedProcess::new(2));
        assert_eq!(device.open_sessions(), 2);
        assert_ne!(first.id(), second.id());
        assert_eq!(first.device_name(), "jem");

        drop(first);
        assert_eq!(device.open_sessions(), 1);
        drop(second);
        assert_eq!(device.stats().open_sessions, 0);
    }

    #[test]
    fn test_unload_flushes() {
        let device = BrokerDevice::load(BrokerConfig::default());
        let buffer = SharedBuffer::new(4096);
        {
            let session = device.open(SimulatedProcess::new(1));
            let fd = session.table().open(&buffer).unwrap();
            assert_eq!(session.ioctl(JEM_ATTACH_DMABUF, fd as u64), i64::from(fd));
            session.table().close(fd).unwrap();
        }
        assert_eq!(buffer.ref_count(), 1);
        assert_eq!(device.stats().entries, 1);

        assert_eq!(device.unload(), 1);
        assert_eq!(buffer.ref_count(), 0);
    }

    #[test]
    fn test_drop_without_unload_flushes_once() {
        let buffer = SharedBuffer::new(64);
        let process = SimulatedProcess::new(1);
        let fd = process.open(&buffer).unwrap();
        {
            let device = BrokerDevice::load(BrokerConfig::default());
            let session = device.open(process);
            session.dispatch(Command::Attach, fd as u64).unwrap();
            assert_eq!(buffer.ref_count(), 2);
            drop(session);
        }
        assert_eq!(buffer.ref_count(), 0);
        assert_eq!(buffer.release_count(), 2);
    }

    #[test]
    fn test_stats_reflect_config() {
        let config = BrokerConfig {
            device_name: "jem-stats".into(),
            version_major: 1,
            version_minor: 3,
            max_entries: Some(2),
        };
        let device = BrokerDevice::load(config);
        let session = device.open(SimulatedProcess::new(9));
        let buffer = SharedBuffer::new(8);
        for _ in 0..3 {
            session.table().open(&buffer).unwrap();
        }

        assert_eq!(session.ioctl(JEM_ATTACH_DMABUF, 0), 0);
        assert_eq!(session.ioctl(JEM_ATTACH_DMABUF, 1), 1);
        assert_eq!(
            session.ioctl(JEM_ATTACH_DMABUF, 2),
            -i64::from(libc::ENOMEM)
        );

        let stats = device.stats();
        assert_eq!(stats.device_name, "jem-stats");
        assert_eq!((stats.version_major, stats.version_minor), (1, 3));
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.open_sessions, 1);

        assert_eq!(session.ioctl(JEM_FLUSH_ALL, 0), 0);
        assert!(device.entries().is_empty());
        assert_eq!(buffer.ref_count(), 3);
    }
}
