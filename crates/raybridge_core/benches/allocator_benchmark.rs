//! # Allocator Benchmark
//!
//! Measures the create/free round trip through the tracked allocator,
//! the path every buffer and acceleration structure takes.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use raybridge_core::memory::{DeviceHeap, VirtualBlock};
use raybridge_core::{AllocResult, GpuAllocator, GpuMemory, RawResource, ResourceDesc, SubAllocatorConfig};

/// Hands out handles and does nothing else.
#[derive(Default)]
struct NullMemory {
    next: AtomicU64,
}

impl GpuMemory for NullMemory {
    fn create_heap(&self, _size: u64) -> AllocResult<DeviceHeap> {
        Ok(DeviceHeap(self.next.fetch_add(1, Ordering::Relaxed)))
    }

    fn destroy_heap(&self, _heap: DeviceHeap) {}

    fn create_committed(&self, _desc: &ResourceDesc) -> AllocResult<RawResource> {
        Ok(RawResource(self.next.fetch_add(1, Ordering::Relaxed)))
    }

    fn create_placed(
        &self,
        _heap: DeviceHeap,
        _offset: u64,
        _desc: &ResourceDesc,
    ) -> AllocResult<RawResource> {
        Ok(RawResource(self.next.fetch_add(1, Ordering::Relaxed)))
    }

    fn destroy_resource(&self, _resource: RawResource) {}
}

fn bench_tracked_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("gpu_allocator");

    for live in [0usize, 1_000, 10_000] {
        let allocator = GpuAllocator::new(Arc::new(NullMemory::default()), SubAllocatorConfig::default());
        // Fragment the pool first
        let _resident: Vec<RawResource> = (0..live)
            .map(|index| {
                allocator
                    .create_resource(&ResourceDesc::buffer(256 + (index as u64 % 7) * 64))
                    .unwrap()
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("create_free", live), &live, |b, _| {
            b.iter(|| {
                let resource = allocator
                    .create_resource(black_box(&ResourceDesc::buffer(4096)))
                    .unwrap();
                allocator.free(resource)
            });
        });
    }

    group.finish();
}

fn bench_virtual_block(c: &mut Criterion) {
    c.bench_function("virtual_block_churn", |b| {
        let mut block = VirtualBlock::new(64 * 1024 * 1024);
        b.iter(|| {
            let offsets: Vec<u64> = (0..64)
                .filter_map(|_| block.allocate(black_box(4096), 256))
                .collect();
            for offset in offsets {
                block.free(offset, 4096);
            }
        });
    });
}

criterion_group!(benches, bench_tracked_round_trip, bench_virtual_block);
criterion_main!(benches);
