//! Per-frame top-level structure.

use raybridge_core::{AllocError, AllocResult, GpuAllocator, RawResource, ResourceDesc};
use raybridge_shared::{Transform, UNASSIGNED_ID};
use tracing::{trace, warn};

use super::bottom_level::{BlasCache, BlasState};
use crate::device::{RaytracingDevice, TlasInstance, MAX_TLAS_INSTANCES};
use crate::error::{RenderError, RenderResult};
use crate::scene::InstanceRecord;

/// Smallest allocation for any top-level resource.
const MIN_RESOURCE_SIZE: u64 = 4096;

/// Outcome of one top-level build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlasReport {
    /// The built structure
    pub tlas: RawResource,
    /// Instances in it
    pub emitted: u32,
    /// Draws left out because their structure was not built or the
    /// instance limit was reached
    pub skipped: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    resource: RawResource,
    size: u64,
}

/// Rebuilds the top-level structure from this frame's draws.
///
/// The descriptor buffer, result and scratch are kept across frames and
/// only grow.
#[derive(Debug, Default)]
pub struct TopLevelBuilder {
    instances: Vec<TlasInstance>,
    previous_transforms: Vec<Transform>,
    descriptors: Option<Slot>,
    result: Option<Slot>,
    scratch: Option<Slot>,
}

impl TopLevelBuilder {
    /// Creates a builder with no device resources yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits one instance per draw whose structure is built, in submission
    /// order, and builds the top-level structure over them.
    ///
    /// Instance ids are positions in the emitted list. Draws past
    /// [`MAX_TLAS_INSTANCES`] are counted as skipped.
    ///
    /// # Errors
    ///
    /// `RenderError::Alloc` if a resource cannot grow, or a device failure.
    pub fn build<D>(
        &mut self,
        draws: &[InstanceRecord],
        cache: &BlasCache,
        device: &D,
        allocator: &GpuAllocator,
    ) -> RenderResult<TlasReport>
    where
        D: RaytracingDevice + ?Sized,
    {
        self.instances.clear();
        self.previous_transforms.clear();

        let mut count: u32 = 0;
        let mut skipped: u32 = 0;
        for draw in draws {
            let Some(entry) = cache
                .get(draw.blas)
                .filter(|entry| entry.state() == BlasState::Built)
            else {
                skipped += 1;
                continue;
            };
            if count == MAX_TLAS_INSTANCES {
                skipped += 1;
                continue;
            }
            self.instances.push(TlasInstance::new(
                draw.transform,
                count,
                entry.mask().bits(),
                entry.instance_flags(),
                entry.address(),
            ));
            self.previous_transforms.push(draw.previous_transform);
            count += 1;
        }
        if count == MAX_TLAS_INSTANCES && skipped > 0 {
            warn!(limit = MAX_TLAS_INSTANCES, "instance limit reached, draws dropped");
        }

        let info = device.tlas_prebuild_info(count);

        let descriptors = grow(
            &mut self.descriptors,
            u64::from(count) * TlasInstance::SIZE as u64,
            ResourceDesc::instance_descs,
            allocator,
        )
        .map_err(alloc_error)?;
        let result = grow(
            &mut self.result,
            info.result_size,
            ResourceDesc::acceleration_structure,
            allocator,
        )
        .map_err(alloc_error)?;
        let scratch = grow(
            &mut self.scratch,
            info.scratch_size,
            ResourceDesc::scratch,
            allocator,
        )
        .map_err(alloc_error)?;

        if !self.instances.is_empty() {
            device.write_resource(descriptors, 0, bytemuck::cast_slice(&self.instances))?;
        }
        device.build_tlas(descriptors, count, result, scratch)?;

        trace!(emitted = count, skipped, "top-level build");
        Ok(TlasReport {
            tlas: result,
            emitted: count,
            skipped,
        })
    }

    /// Instances of the last build.
    #[must_use]
    pub fn instances(&self) -> &[TlasInstance] {
        &self.instances
    }

    /// Previous transforms of the last build, in instance order.
    #[must_use]
    pub fn previous_transforms(&self) -> &[Transform] {
        &self.previous_transforms
    }

    /// The current result storage.
    #[must_use]
    pub fn tlas(&self) -> Option<RawResource> {
        self.result.map(|r| r.resource)
    }

    /// Releases every device resource.
    pub fn release(&mut self, allocator: &GpuAllocator) {
        for slot in [&mut self.descriptors, &mut self.result, &mut self.scratch] {
            if let Some(current) = slot.take() {
                allocator.free(current.resource);
            }
        }
    }
}

fn alloc_error(source: AllocError) -> RenderError {
    RenderError::Alloc {
        id: UNASSIGNED_ID,
        source,
    }
}

fn grow(
    slot: &mut Option<Slot>,
    needed: u64,
    describe: fn(u64) -> ResourceDesc,
    allocator: &GpuAllocator,
) -> AllocResult<RawResource> {
    if let Some(current) = slot {
        if current.size >= needed {
            return Ok(current.resource);
        }
    }

    let size = needed.max(MIN_RESOURCE_SIZE).next_power_of_two();
    let resource = allocator.create_resource(&describe(size))?;
    if let Some(old) = slot.replace(Slot { resource, size }) {
        allocator.free(old.resource);
    }
    Ok(resource)
}
