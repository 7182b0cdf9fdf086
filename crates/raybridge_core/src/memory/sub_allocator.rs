//! # Pooled Sub-Allocator
//!
//! Carves resources out of large device heaps instead of giving each one
//! its own memory.
//!
//! ```text
//!  block 0 (64 MiB heap)   [vb][ib][ blas ][  free  ][tex]
//!  block 1 (64 MiB heap)   [ blas ][        free         ]
//!  dedicated               [ request >= block_size / 2 ]
//! ```
//!
//! Empty blocks are kept for reuse until `trim` releases them.

use std::sync::Arc;

use tracing::{debug, warn};

use super::device::{DeviceHeap, GpuMemory, RawResource, ResourceDesc};
use super::virtual_block::VirtualBlock;
use crate::error::{AllocError, AllocResult};

/// Default block size (64 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// Default minimum placement alignment.
pub const DEFAULT_ALIGNMENT: u64 = 256;

/// Sub-allocator settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubAllocatorConfig {
    /// Bytes per device heap
    pub block_size: u64,
    /// Minimum alignment of every placed resource
    pub alignment: u64,
}

impl Default for SubAllocatorConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl SubAllocatorConfig {
    /// Sets the heap size.
    #[must_use]
    pub const fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the minimum alignment.
    #[must_use]
    pub const fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }
}

/// Where an allocation lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Inside a pooled block
    Block {
        /// Block index
        block: usize,
        /// Byte offset in the block
        offset: u64,
    },
    /// Own committed memory
    Dedicated,
}

/// One live resource and its memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Device handle
    pub resource: RawResource,
    /// Memory location
    pub placement: Placement,
    /// Bytes reserved
    pub size: u64,
}

/// Occupancy counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubAllocatorStats {
    /// Device heaps held
    pub blocks: usize,
    /// Bytes in those heaps
    pub reserved_bytes: u64,
    /// Bytes placed in heaps
    pub placed_bytes: u64,
    /// Resources placed in heaps
    pub placed: usize,
    /// Resources with their own memory
    pub dedicated: usize,
    /// Bytes of dedicated resources
    pub dedicated_bytes: u64,
}

#[derive(Debug)]
struct Block {
    heap: DeviceHeap,
    range: VirtualBlock,
}

/// Places resources in pooled device heaps.
///
/// Not thread-safe; `GpuAllocator` wraps it in its critical section.
pub struct SubAllocator {
    device: Arc<dyn GpuMemory>,
    config: SubAllocatorConfig,
    blocks: Vec<Option<Block>>,
    placed: usize,
    dedicated: usize,
    dedicated_bytes: u64,
}

impl SubAllocator {
    /// Creates an allocator with no blocks.
    ///
    /// # Panics
    ///
    /// If the alignment is not a power of two or the block size is zero.
    #[must_use]
    pub fn new(device: Arc<dyn GpuMemory>, config: SubAllocatorConfig) -> Self {
        assert!(config.alignment.is_power_of_two(), "alignment must be a power of two");
        assert!(config.block_size > 0, "block size must be greater than zero");
        Self {
            device,
            config,
            blocks: Vec::new(),
            placed: 0,
            dedicated: 0,
            dedicated_bytes: 0,
        }
    }

    /// Active settings.
    #[must_use]
    pub const fn config(&self) -> &SubAllocatorConfig {
        &self.config
    }

    /// Creates a resource, pooled or dedicated by size.
    ///
    /// # Errors
    ///
    /// `AllocError::ZeroSize`, `AllocError::BadAlignment`, or whatever the
    /// device reports. A failed placement leaves no memory reserved.
    pub fn allocate(&mut self, desc: &ResourceDesc) -> AllocResult<Allocation> {
        if desc.size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if !desc.alignment.is_power_of_two() {
            return Err(AllocError::BadAlignment(desc.alignment));
        }

        if desc.size >= self.config.block_size / 2 {
            let resource = self.device.create_committed(desc)?;
            self.dedicated += 1;
            self.dedicated_bytes += desc.size;
            debug!(size = desc.size, kind = ?desc.kind, "dedicated allocation");
            return Ok(Allocation {
                resource,
                placement: Placement::Dedicated,
                size: desc.size,
            });
        }

        let alignment = desc.alignment.max(self.config.alignment);
        let (index, offset) = match self.find_space(desc.size, alignment) {
            Some(found) => found,
            None => {
                let index = self.add_block()?;
                let offset = self.blocks[index]
                    .as_mut()
                    .and_then(|block| block.range.allocate(desc.size, alignment))
                    .ok_or(AllocError::OutOfMemory { size: desc.size })?;
                (index, offset)
            }
        };

        let Some(block) = self.blocks[index].as_mut() else {
            return Err(AllocError::OutOfMemory { size: desc.size });
        };
        match self.device.create_placed(block.heap, offset, desc) {
            Ok(resource) => {
                self.placed += 1;
                Ok(Allocation {
                    resource,
                    placement: Placement::Block {
                        block: index,
                        offset,
                    },
                    size: desc.size,
                })
            }
            Err(error) => {
                block.range.free(offset, desc.size);
                Err(error)
            }
        }
    }

    /// Destroys the resource and returns its memory.
    pub fn free(&mut self, allocation: Allocation) {
        self.device.destroy_resource(allocation.resource);
        match allocation.placement {
            Placement::Block { block, offset } => {
                if let Some(Some(block)) = self.blocks.get_mut(block) {
                    block.range.free(offset, allocation.size);
                    self.placed -= 1;
                } else {
                    warn!(?allocation, "freed allocation of a released block");
                }
            }
            Placement::Dedicated => {
                self.dedicated -= 1;
                self.dedicated_bytes -= allocation.size;
            }
        }
    }

    /// Releases every empty block. Returns how many were released.
    pub fn trim(&mut self) -> usize {
        let mut released = 0;
        for slot in &mut self.blocks {
            if slot.as_ref().is_some_and(|block| block.range.is_empty()) {
                if let Some(block) = slot.take() {
                    self.device.destroy_heap(block.heap);
                    released += 1;
                }
            }
        }
        if released > 0 {
            debug!(released, "trimmed empty blocks");
        }
        released
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> SubAllocatorStats {
        let mut stats = SubAllocatorStats {
            placed: self.placed,
            dedicated: self.dedicated,
            dedicated_bytes: self.dedicated_bytes,
            ..SubAllocatorStats::default()
        };
        for block in self.blocks.iter().flatten() {
            stats.blocks += 1;
            stats.reserved_bytes += block.range.size();
            stats.placed_bytes += block.range.used();
        }
        stats
    }

    fn find_space(&mut self, size: u64, alignment: u64) -> Option<(usize, u64)> {
        self.blocks
            .iter_mut()
            .enumerate()
            .find_map(|(index, slot)| {
                let block = slot.as_mut()?;
                block.range.allocate(size, alignment).map(|offset| (index, offset))
            })
    }

    fn add_block(&mut self) -> AllocResult<usize> {
        let heap = self.device.create_heap(self.config.block_size)?;
        let block = Block {
            heap,
            range: VirtualBlock::new(self.config.block_size),
        };

        let index = match self.blocks.iter().position(Option::is_none) {
            Some(index) => {
                self.blocks[index] = Some(block);
                index
            }
            None => {
                self.blocks.push(Some(block));
                self.blocks.len() - 1
            }
        };
        debug!(index, size = self.config.block_size, "added block");
        Ok(index)
    }
}

impl Drop for SubAllocator {
    fn drop(&mut self) {
        for block in self.blocks.iter_mut().filter_map(Option::take) {
            if !block.range.is_empty() {
                warn!(
                    live = block.range.live_allocations(),
                    "releasing block with live resources"
                );
            }
            self.device.destroy_heap(block.heap);
        }
    }
}

impl std::fmt::Debug for SubAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::device::testing::FakeMemory;
    use std::sync::atomic::Ordering;

    const BLOCK: u64 = 4096;

    fn allocator() -> (Arc<FakeMemory>, SubAllocator) {
        let device = Arc::new(FakeMemory::default());
        let config = SubAllocatorConfig::default()
            .with_block_size(BLOCK)
            .with_alignment(256);
        let pool = SubAllocator::new(device.clone(), config);
        (device, pool)
    }

    #[test]
    fn test_small_requests_share_a_block() {
        let (device, mut pool) = allocator();
        let a = pool.allocate(&ResourceDesc::buffer(100)).unwrap();
        let b = pool.allocate(&ResourceDesc::buffer(100)).unwrap();

        assert_eq!(device.heaps.lock().len(), 1);
        assert_eq!(a.placement, Placement::Block { block: 0, offset: 0 });
        assert_eq!(b.placement, Placement::Block { block: 0, offset: 256 });
        assert_eq!(pool.stats().placed, 2);
    }

    #[test]
    fn test_half_block_is_dedicated() {
        let (device, mut pool) = allocator();
        let big = pool.allocate(&ResourceDesc::buffer(BLOCK / 2)).unwrap();

        assert_eq!(big.placement, Placement::Dedicated);
        assert!(device.heaps.lock().is_empty());
        assert_eq!(device.resources.lock().get(&big.resource), Some(&None));

        pool.free(big);
        assert_eq!(pool.stats().dedicated, 0);
    }

    #[test]
    fn test_new_block_when_full() {
        let (device, mut pool) = allocator();
        let _a = pool.allocate(&ResourceDesc::buffer(2000)).unwrap();
        let _b = pool.allocate(&ResourceDesc::buffer(2000)).unwrap();
        let c = pool.allocate(&ResourceDesc::buffer(2000)).unwrap();

        assert_eq!(device.heaps.lock().len(), 2);
        assert!(matches!(c.placement, Placement::Block { block: 1, .. }));
    }

    #[test]
    fn test_trim_releases_empty_blocks() {
        let (device, mut pool) = allocator();
        let a = pool.allocate(&ResourceDesc::buffer(100)).unwrap();
        pool.free(a);

        assert_eq!(pool.stats().blocks, 1, "empty blocks are kept");
        assert_eq!(pool.trim(), 1);
        assert!(device.heaps.lock().is_empty());
        assert_eq!(pool.stats(), SubAllocatorStats::default());
    }

    #[test]
    fn test_heap_failure_propagates() {
        let (device, mut pool) = allocator();
        device.fail_heaps.store(true, Ordering::Relaxed);

        let result = pool.allocate(&ResourceDesc::buffer(100));
        assert_eq!(result, Err(AllocError::OutOfMemory { size: BLOCK }));
        assert_eq!(pool.allocate(&ResourceDesc::buffer(0)), Err(AllocError::ZeroSize));
    }

    #[test]
    fn test_texture_alignment_wins() {
        let device = Arc::new(FakeMemory::default());
        let config = SubAllocatorConfig::default().with_block_size(1 << 20);
        let mut pool = SubAllocator::new(device, config);

        let _buffer = pool.allocate(&ResourceDesc::buffer(100)).unwrap();
        let texture = pool.allocate(&ResourceDesc::texture(1024)).unwrap();
        assert_eq!(
            texture.placement,
            Placement::Block {
                block: 0,
                offset: ResourceDesc::TEXTURE_ALIGNMENT
            }
        );
    }
}
