// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process buffer objects and descriptor tables.
//!
//! [`SharedBuffer`] stands in for a kernel buffer object whose reference count
//! lives outside the broker. [`SimulatedProcess`] is one process's descriptor
//! table over those buffers: lowest-free-slot allocation, an optional
//! descriptor limit, and close semantics that drop exactly one reference.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::DescriptorTable;
use crate::{BrokerError, RawDescriptor, Result};

/// Descriptor limit used by [`SimulatedProcess::new`].
pub const DEFAULT_DESCRIPTOR_LIMIT: usize = 1024;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

struct BufferObject {
    id: u64,
    len: usize,
    refs: AtomicUsize,
    releases: AtomicUsize,
}

/// Inspection handle for a simulated buffer object.
///
/// The handle itself holds no counted reference; only [`BufferRef`]s do.
#[derive(Clone)]
pub struct SharedBuffer {
    object: Arc<BufferObject>,
}

impl SharedBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            object: Arc::new(BufferObject {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                len,
                refs: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.object.id
    }

    pub fn len(&self) -> usize {
        self.object.len
    }

    pub fn is_empty(&self) -> bool {
        self.object.len == 0
    }

    /// Live references to this buffer across every table and registry.
    pub fn ref_count(&self) -> usize {
        self.object.refs.load(Ordering::SeqCst)
    }

    /// Total references ever dropped.
    pub fn release_count(&self) -> usize {
        self.object.releases.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("id", &self.object.id)
            .field("len", &self.object.len)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// One counted reference to a [`SharedBuffer`].
pub struct BufferRef {
    object: Arc<BufferObject>,
}

impl BufferRef {
    fn retain(object: &Arc<BufferObject>) -> Self {
        object.refs.fetch_add(1, Ordering::SeqCst);
        Self {
            object: Arc::clone(object),
        }
    }

    pub fn buffer_id(&self) -> u64 {
        self.object.id
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        self.object.refs.fetch_sub(1, Ordering::SeqCst);
        self.object.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BufferRef").field(&self.object.id).finish()
    }
}

/// Descriptor table of a simulated process.
pub struct SimulatedProcess {
    pid: u32,
    limit: usize,
    descriptors: Mutex<BTreeMap<RawDescriptor, BufferRef>>,
}

impl SimulatedProcess {
    pub fn new(pid: u32) -> Self {
        Self::with_limit(pid, DEFAULT_DESCRIPTOR_LIMIT)
    }

    /// Process whose table holds at most `limit` descriptors.
    pub fn with_limit(pid: u32, limit: usize) -> Self {
        Self {
            pid,
            limit,
            descriptors: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Open `buffer` in this process, taking one reference.
    pub fn open(&self, buffer: &SharedBuffer) -> Result<RawDescriptor> {
        self.install(BufferRef::retain(&buffer.object))
    }

    /// Close `descriptor`, dropping the reference it held.
    pub fn close(&self, descriptor: RawDescriptor) -> Result<()> {
        let removed = self.descriptors.lock().remove(&descriptor);
        match removed {
            Some(_reference) => Ok(()),
            None => Err(BrokerError::ResourceUnavailable {
                descriptor,
                reason: format!("not open in process {}", self.pid),
            }),
        }
    }

    pub fn is_open(&self, descriptor: RawDescriptor) -> bool {
        self.descriptors.lock().contains_key(&descriptor)
    }

    /// Buffer ID behind `descriptor`, if open.
    pub fn buffer_id(&self, descriptor: RawDescriptor) -> Option<u64> {
        self.descriptors
            .lock()
            .get(&descriptor)
            .map(BufferRef::buffer_id)
    }

    pub fn open_count(&self) -> usize {
        self.descriptors.lock().len()
    }
}

impl DescriptorTable for SimulatedProcess {
    type Resource = BufferRef;

    fn acquire(&self, descriptor: RawDescriptor) -> Result<BufferRef> {
        self.descriptors
            .lock()
            .get(&descriptor)
            .map(|reference| BufferRef::retain(&reference.object))
            .ok_or_else(|| BrokerError::ResourceUnavailable {
                descriptor,
                reason: format!("not open in process {}", self.pid),
            })
    }

    fn duplicate(&self, resource: &BufferRef) -> Result<BufferRef> {
        Ok(BufferRef::retain(&resource.object))
    }

    fn install(&self, resource: BufferRef) -> Result<RawDescriptor> {
        let mut descriptors = self.descriptors.lock();

        // Lowest free slot, like the kernel's fd allocator.
        let mut slot: RawDescriptor = 0;
        for &used in descriptors.keys() {
            if used != slot {
                break;
            }
            slot += 1;
        }

        if slot as usize >= self.limit {
            return Err(BrokerError::DescriptorExhausted(format!(
                "process {} reached its limit of {} descriptors",
                self.pid, self.limit
            )));
        }

        descriptors.insert(slot, resource);
        Ok(slot)
    }
}

impl std::fmt::Debug for SimulatedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedProcess")
            .field("pid", &self.pid)
            .field("limit", &self.limit)
            .field("open", &self.open_count())
            .finish()
    }
}
