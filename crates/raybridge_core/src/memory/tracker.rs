//! # GPU Allocator
//!
//! Every resource the consumer creates goes through `create_resource`,
//! which places it with the sub-allocator and records the allocation
//! under the raw handle. `free` looks the handle up and releases the
//! allocation exactly once.
//!
//! ## Rules
//!
//! - At most one live allocation per handle.
//! - `free` of an unknown handle does nothing. This covers resources
//!   created while a `BootstrapGuard` was held, which bypass the pool.
//! - A `BootstrapGuard` only affects the thread that took it.
//! - One critical section covers the map and the pool.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::device::{GpuMemory, RawResource, ResourceDesc};
use super::sub_allocator::{Allocation, SubAllocator, SubAllocatorConfig, SubAllocatorStats};
use crate::error::AllocResult;

/// Allocator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Pool occupancy
    pub pool: SubAllocatorStats,
    /// Tracked live resources
    pub live: usize,
    /// Successful frees
    pub frees: u64,
    /// Frees of unknown handles
    pub ignored_frees: u64,
    /// Resources created on the bootstrap path
    pub untracked: u64,
}

#[derive(Debug)]
struct TrackerState {
    pool: SubAllocator,
    allocations: HashMap<RawResource, Allocation>,
    frees: u64,
    ignored_frees: u64,
    untracked: u64,
}

/// The process-wide GPU allocator of the consumer.
#[derive(Debug)]
pub struct GpuAllocator {
    device: Arc<dyn GpuMemory>,
    state: Mutex<TrackerState>,
    /// Guard depth per thread; absent means zero.
    bootstrap_depth: Mutex<HashMap<ThreadId, u32>>,
}

impl GpuAllocator {
    /// Creates an allocator over `device`.
    #[must_use]
    pub fn new(device: Arc<dyn GpuMemory>, config: SubAllocatorConfig) -> Self {
        let pool = SubAllocator::new(Arc::clone(&device), config);
        Self {
            device,
            state: Mutex::new(TrackerState {
                pool,
                allocations: HashMap::new(),
                frees: 0,
                ignored_frees: 0,
                untracked: 0,
            }),
            bootstrap_depth: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a resource and tracks its allocation.
    ///
    /// While the calling thread holds a `BootstrapGuard` the resource is
    /// created directly on the device and not tracked; the caller destroys
    /// it itself.
    ///
    /// # Errors
    ///
    /// Pool or device failures, unchanged.
    pub fn create_resource(&self, desc: &ResourceDesc) -> AllocResult<RawResource> {
        if self.in_bootstrap() {
            let resource = self.device.create_committed(desc)?;
            self.state.lock().untracked += 1;
            debug!(?resource, kind = ?desc.kind, "untracked bootstrap resource");
            return Ok(resource);
        }

        let mut state = self.state.lock();
        let allocation = state.pool.allocate(desc)?;
        let previous = state.allocations.insert(allocation.resource, allocation);
        debug_assert!(previous.is_none(), "device reused a live handle");
        trace!(resource = ?allocation.resource, size = desc.size, "tracked resource");
        Ok(allocation.resource)
    }

    /// Destroys a tracked resource and releases its memory.
    ///
    /// Returns false, doing nothing, if `resource` is not tracked.
    pub fn free(&self, resource: RawResource) -> bool {
        let mut state = self.state.lock();
        match state.allocations.remove(&resource) {
            Some(allocation) => {
                state.pool.free(allocation);
                state.frees += 1;
                true
            }
            None => {
                state.ignored_frees += 1;
                trace!(?resource, "free of untracked handle ignored");
                false
            }
        }
    }

    /// Routes this thread's creations to the untracked path until the guard
    /// drops. Other threads keep allocating from the pool.
    #[must_use]
    pub fn bootstrap(&self) -> BootstrapGuard<'_> {
        let thread = thread::current().id();
        *self.bootstrap_depth.lock().entry(thread).or_insert(0) += 1;
        BootstrapGuard {
            allocator: self,
            thread,
            _not_send: PhantomData,
        }
    }

    /// True while the calling thread holds a `BootstrapGuard`.
    #[must_use]
    pub fn in_bootstrap(&self) -> bool {
        self.bootstrap_depth
            .lock()
            .contains_key(&thread::current().id())
    }

    /// True if `resource` has a live tracked allocation.
    #[must_use]
    pub fn is_tracked(&self, resource: RawResource) -> bool {
        self.state.lock().allocations.contains_key(&resource)
    }

    /// The allocation behind a tracked handle.
    #[must_use]
    pub fn allocation(&self, resource: RawResource) -> Option<Allocation> {
        self.state.lock().allocations.get(&resource).copied()
    }

    /// Releases empty pool blocks.
    pub fn trim(&self) -> usize {
        self.state.lock().pool.trim()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        let state = self.state.lock();
        AllocatorStats {
            pool: state.pool.stats(),
            live: state.allocations.len(),
            frees: state.frees,
            ignored_frees: state.ignored_frees,
            untracked: state.untracked,
        }
    }

    /// The device behind the allocator.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn GpuMemory> {
        &self.device
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        let TrackerState {
            pool, allocations, ..
        } = self.state.get_mut();
        if !allocations.is_empty() {
            debug!(live = allocations.len(), "releasing live allocations");
        }
        for (_, allocation) in allocations.drain() {
            pool.free(allocation);
        }
    }
}

/// Keeps resource creation on the untracked path. See `GpuAllocator::bootstrap`.
///
/// Not `Send`: it must drop on the thread that took it.
#[derive(Debug)]
pub struct BootstrapGuard<'a> {
    allocator: &'a GpuAllocator,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl Drop for BootstrapGuard<'_> {
    fn drop(&mut self) {
        let mut depths = self.allocator.bootstrap_depth.lock();
        if let Some(depth) = depths.get_mut(&self.thread) {
            *depth -= 1;
            if *depth == 0 {
                depths.remove(&self.thread);
            }
        }
    }
}
