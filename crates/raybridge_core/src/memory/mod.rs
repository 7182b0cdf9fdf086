//! # GPU Memory
//!
//! Resource creation on the consumer goes through `GpuAllocator`, which
//! pools small resources in large device heaps and remembers every
//! allocation by its raw handle.
//!
//! ## Design Philosophy
//!
//! - One allocation per resource, released exactly once
//! - Allocation failure is a resource-level error, never a panic
//! - The device is a trait; the allocator never talks to a driver directly

mod device;
mod sub_allocator;
mod tracker;
mod virtual_block;

pub use device::{DeviceHeap, GpuMemory, RawResource, ResourceDesc, ResourceKind};
pub use sub_allocator::{
    Allocation, Placement, SubAllocator, SubAllocatorConfig, SubAllocatorStats,
    DEFAULT_ALIGNMENT, DEFAULT_BLOCK_SIZE,
};
pub use tracker::{AllocatorStats, BootstrapGuard, GpuAllocator};
pub use virtual_block::{align_up, VirtualBlock};
