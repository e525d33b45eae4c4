// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Thread-safe handle registry.
//!
//! Maps the descriptor a caller attached with to the broker's own reference
//! on the underlying buffer. Every structural change happens under one
//! mutex, so attach, release, duplicate and flush on the same key are
//! totally ordered. Descriptor-table calls that can block (acquire, install)
//! stay outside the lock; only the reference bump for a duplicate runs
//! inside it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{BrokerError, RawDescriptor, Result};

/// A registered resource, reachable from the registry exactly once.
struct RegistryEntry<R> {
    key: RawDescriptor,
    resource: R,
    attached_at: Instant,
    duplicate_count: u64,
}

impl<R> RegistryEntry<R> {
    fn new(key: RawDescriptor, resource: R) -> Self {
        Self {
            key,
            resource,
            attached_at: Instant::now(),
            duplicate_count: 0,
        }
    }

    fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key,
            age: self.attached_at.elapsed(),
            duplicate_count: self.duplicate_count,
        }
    }
}

/// Diagnostic view of one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: RawDescriptor,
    pub age: Duration,
    pub duplicate_count: u64,
}

/// A refused insert. The registry did not take the resource; it is handed
/// back so the caller decides how to release it.
#[derive(Debug)]
pub struct Rejected<R> {
    pub reason: BrokerError,
    pub resource: R,
}

impl<R> Rejected<R> {
    pub fn into_parts(self) -> (BrokerError, R) {
        (self.reason, self.resource)
    }
}

/// Concurrent map from key to the broker's reference on a shared buffer.
///
/// Cloning shares the same underlying map.
pub struct HandleRegistry<R> {
    inner: Arc<RegistryInner<R>>,
}

struct RegistryInner<R> {
    entries: Mutex<HashMap<RawDescriptor, RegistryEntry<R>>>,
    max_entries: Option<usize>,
}

impl<R> HandleRegistry<R> {
    /// Create an empty, unbounded registry.
    pub fn new() -> Self {
        Self::with_max_entries(None)
    }

    /// Create an empty registry holding at most `max_entries` entries.
    pub fn with_max_entries(max_entries: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                max_entries,
            }),
        }
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.inner.max_entries
    }

    /// Insert `resource` under `key`.
    ///
    /// Fails with [`BrokerError::AlreadyExists`] if the key is live, or
    /// [`BrokerError::AllocationFailure`] if the map cannot grow. Either way the
    /// map is untouched and the resource comes back in the [`Rejected`].
    pub fn insert(
        &self,
        key: RawDescriptor,
        resource: R,
    ) -> std::result::Result<(), Rejected<R>> {
        let mut entries = self.inner.entries.lock();

        if entries.contains_key(&key) {
            return Err(Rejected {
                reason: BrokerError::AlreadyExists(key),
                resource,
            });
        }

        if let Some(max) = self.inner.max_entries {
            if entries.len() >= max {
                return Err(Rejected {
                    reason: BrokerError::AllocationFailure(format!(
                        "registry full ({} entries)",
                        max
                    )),
                    resource,
                });
            }
        }

        if let Err(e) = entries.try_reserve(1) {
            return Err(Rejected {
                reason: BrokerError::AllocationFailure(e.to_string()),
                resource,
            });
        }

        entries.insert(key, RegistryEntry::new(key, resource));
        Ok(())
    }

    /// Remove the entry under `key` and return its resource.
    pub fn remove(&self, key: RawDescriptor) -> Result<R> {
        self.inner
            .entries
            .lock()
            .remove(&key)
            .map(|entry| entry.resource)
            .ok_or(BrokerError::NotFound(key))
    }

    /// Read-only access to the resource under `key`.
    ///
    /// The lock is held while `f` runs; `f` must not call back into the registry.
    pub fn lookup<T>(&self, key: RawDescriptor, f: impl FnOnce(&R) -> T) -> Option<T> {
        self.inner
            .entries
            .lock()
            .get(&key)
            .map(|entry| f(&entry.resource))
    }

    /// Find the entry under `key` and run `duplicate` on its resource without
    /// releasing the lock in between.
    ///
    /// A concurrent remove can therefore never slip between the presence
    /// check and the reference bump.
    pub fn duplicate_with<T>(
        &self,
        key: RawDescriptor,
        duplicate: impl FnOnce(&R) -> Result<T>,
    ) -> Result<T> {
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(&key).ok_or(BrokerError::NotFound(key))?;
        let duplicated = duplicate(&entry.resource)?;
        entry.duplicate_count += 1;
        Ok(duplicated)
    }

    /// Atomically empty the map, returning every entry.
    ///
    /// Inserts that win the lock afterwards land in the fresh map.
    pub fn drain_all(&self) -> Vec<(RawDescriptor, R)> {
        let drained = std::mem::take(&mut *self.inner.entries.lock());
        drained
            .into_iter()
            .map(|(key, entry)| (key, entry.resource))
            .collect()
    }

    /// Drain the map and drop every resource outside the lock.
    ///
    /// Returns the number of entries released.
    pub fn flush_all(&self) -> usize {
        let drained = self.drain_all();
        let count = drained.len();

        for (key, resource) in drained {
            tracing::debug!("[Broker] Freeing entry ({})", key);
            drop(resource);
        }

        count
    }

    pub fn contains(&self, key: RawDescriptor) -> bool {
        self.inner.entries.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Snapshot of all entries, ordered by key.
    pub fn snapshot(&self) -> Vec<EntryInfo> {
        let mut infos: Vec<EntryInfo> = self
            .inner
            .entries
            .lock()
            .values()
            .map(RegistryEntry::info)
            .collect();
        infos.sort_by_key(|info| info.key);
        infos
    }
}

impl<R> Clone for HandleRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> Default for HandleRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for HandleRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("len", &self.len())
            .field("max_entries", &self.inner.max_entries)
            .finish()
    }
}
