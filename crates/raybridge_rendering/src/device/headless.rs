//! CPU stand-in for a ray-tracing GPU.
//!
//! Keeps every resource in host memory and records what was built, rendered
//! and presented. Used by `raybridge_host --headless` and the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use raybridge_core::{
    AllocError, AllocResult, DeviceHeap, GpuMemory, RawResource, ResourceDesc, ResourceKind,
};
use raybridge_shared::{GeometryDesc, Transform};
use tracing::trace;

use super::{
    BlasGeometry, Capabilities, FeatureLevel, FrameInputs, PrebuildInfo, RaytracingDevice,
    TlasInstance,
};
use crate::error::{RenderError, RenderResult};

/// Base of the fake device address space.
const ADDRESS_BASE: u64 = 0x1_0000_0000;

/// Address stride per resource handle.
const ADDRESS_STRIDE: u64 = 0x1_0000;

/// A recorded bottom-level build.
#[derive(Clone, Debug, PartialEq)]
pub struct BlasBuild {
    /// Result storage
    pub destination: RawResource,
    /// Scratch used
    pub scratch: RawResource,
    /// Geometries in build order
    pub geometries: Vec<GeometryDesc>,
    /// Opaque flag per geometry
    pub opaque: Vec<bool>,
}

/// A recorded top-level build.
#[derive(Clone, Debug, PartialEq)]
pub struct TlasBuild {
    /// Result storage
    pub destination: RawResource,
    /// Instances read from the descriptor buffer
    pub instances: Vec<TlasInstance>,
}

/// A recorded `render` call.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedFrame {
    /// Producer frame number
    pub frame: u64,
    /// Top-level structure traced
    pub tlas: RawResource,
    /// Instances traced
    pub instance_count: u32,
    /// Previous transforms, in instance order
    pub previous_transforms: Vec<Transform>,
    /// Temporal history dropped
    pub reset_accumulation: bool,
}

#[derive(Debug)]
struct HostResource {
    desc: ResourceDesc,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    heaps: HashMap<DeviceHeap, u64>,
    resources: HashMap<RawResource, HostResource>,
    blas_builds: Vec<BlasBuild>,
    tlas_builds: Vec<TlasBuild>,
    frames: Vec<RenderedFrame>,
    presents: u64,
}

/// A device that does everything on the CPU.
#[derive(Debug)]
pub struct HeadlessDevice {
    capabilities: Capabilities,
    next_handle: AtomicU64,
    failing_allocations: AtomicU32,
    failing_builds: AtomicBool,
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// A device meeting every minimum.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities {
            adapter: "Headless".to_string(),
            raytracing_tier: FeatureLevel::new(1, 1),
            shader_model: FeatureLevel::new(6, 6),
            resource_binding_tier: 3,
        })
    }

    /// A device reporting `capabilities`.
    #[must_use]
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            next_handle: AtomicU64::new(1),
            failing_allocations: AtomicU32::new(0),
            failing_builds: AtomicBool::new(false),
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// Makes the next `count` heap or resource creations fail.
    pub fn fail_next_allocations(&self, count: u32) {
        self.failing_allocations.store(count, Ordering::Release);
    }

    /// Makes every acceleration-structure build fail while set.
    pub fn set_failing_builds(&self, failing: bool) {
        self.failing_builds.store(failing, Ordering::Release);
    }

    /// Bottom-level builds so far.
    #[must_use]
    pub fn blas_builds(&self) -> Vec<BlasBuild> {
        self.state.lock().blas_builds.clone()
    }

    /// Number of bottom-level builds so far.
    #[must_use]
    pub fn blas_build_count(&self) -> usize {
        self.state.lock().blas_builds.len()
    }

    /// Top-level builds so far.
    #[must_use]
    pub fn tlas_builds(&self) -> Vec<TlasBuild> {
        self.state.lock().tlas_builds.clone()
    }

    /// The latest top-level build.
    #[must_use]
    pub fn last_tlas(&self) -> Option<TlasBuild> {
        self.state.lock().tlas_builds.last().cloned()
    }

    /// Frames rendered so far.
    #[must_use]
    pub fn frames(&self) -> Vec<RenderedFrame> {
        self.state.lock().frames.clone()
    }

    /// The latest rendered frame.
    #[must_use]
    pub fn last_frame(&self) -> Option<RenderedFrame> {
        self.state.lock().frames.last().cloned()
    }

    /// Number of `present` calls.
    #[must_use]
    pub fn presents(&self) -> u64 {
        self.state.lock().presents
    }

    /// Live resources.
    #[must_use]
    pub fn live_resources(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Live heaps.
    #[must_use]
    pub fn live_heaps(&self) -> usize {
        self.state.lock().heaps.len()
    }

    /// Description of a live resource.
    #[must_use]
    pub fn resource_desc(&self, resource: RawResource) -> Option<ResourceDesc> {
        self.state.lock().resources.get(&resource).map(|r| r.desc)
    }

    /// Bytes written to a live resource so far.
    #[must_use]
    pub fn resource_data(&self, resource: RawResource) -> Option<Vec<u8>> {
        self.state.lock().resources.get(&resource).map(|r| r.data.clone())
    }

    /// The resource behind a device address.
    #[must_use]
    pub fn resource_at(&self, address: u64) -> Option<RawResource> {
        let handle = address.checked_sub(ADDRESS_BASE)? / ADDRESS_STRIDE;
        let resource = RawResource(handle);
        self.state
            .lock()
            .resources
            .contains_key(&resource)
            .then_some(resource)
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn take_failure(&self) -> bool {
        self.failing_allocations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn insert_resource(&self, desc: &ResourceDesc) -> AllocResult<RawResource> {
        if self.take_failure() {
            return Err(AllocError::OutOfMemory { size: desc.size });
        }
        let resource = RawResource(self.next_handle());
        self.state.lock().resources.insert(
            resource,
            HostResource {
                desc: *desc,
                data: Vec::new(),
            },
        );
        Ok(resource)
    }

    fn check_build(&self) -> RenderResult<()> {
        if self.failing_builds.load(Ordering::Acquire) {
            Err(RenderError::Device("injected build failure".to_string()))
        } else {
            Ok(())
        }
    }
}

fn expect_kind(
    state: &HeadlessState,
    resource: RawResource,
    kinds: &[ResourceKind],
    min_size: u64,
) -> RenderResult<()> {
    let host = state
        .resources
        .get(&resource)
        .ok_or_else(|| RenderError::Device(format!("{resource:?} is not a live resource")))?;
    if !kinds.contains(&host.desc.kind) {
        return Err(RenderError::Device(format!(
            "{resource:?} is a {:?}, expected one of {kinds:?}",
            host.desc.kind
        )));
    }
    if host.desc.size < min_size {
        return Err(RenderError::Device(format!(
            "{resource:?} holds {} bytes, build needs {min_size}",
            host.desc.size
        )));
    }
    Ok(())
}

impl GpuMemory for HeadlessDevice {
    fn create_heap(&self, size: u64) -> AllocResult<DeviceHeap> {
        if self.take_failure() {
            return Err(AllocError::OutOfMemory { size });
        }
        let heap = DeviceHeap(self.next_handle());
        self.state.lock().heaps.insert(heap, size);
        Ok(heap)
    }

    fn destroy_heap(&self, heap: DeviceHeap) {
        self.state.lock().heaps.remove(&heap);
    }

    fn create_committed(&self, desc: &ResourceDesc) -> AllocResult<RawResource> {
        self.insert_resource(desc)
    }

    fn create_placed(
        &self,
        heap: DeviceHeap,
        offset: u64,
        desc: &ResourceDesc,
    ) -> AllocResult<RawResource> {
        let heap_size = self
            .state
            .lock()
            .heaps
            .get(&heap)
            .copied()
            .ok_or_else(|| AllocError::Device(format!("{heap:?} is not a live heap")))?;
        if offset + desc.size > heap_size {
            return Err(AllocError::Device(format!(
                "placement at {offset} of {} bytes overflows {heap:?}",
                desc.size
            )));
        }
        self.insert_resource(desc)
    }

    fn destroy_resource(&self, resource: RawResource) {
        self.state.lock().resources.remove(&resource);
    }
}

impl RaytracingDevice for HeadlessDevice {
    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn write_resource(&self, resource: RawResource, offset: u64, data: &[u8]) -> RenderResult<()> {
        let mut state = self.state.lock();
        let host = state
            .resources
            .get_mut(&resource)
            .ok_or_else(|| RenderError::Device(format!("write to dead {resource:?}")))?;

        let end = offset + data.len() as u64;
        if end > host.desc.size {
            return Err(RenderError::Device(format!(
                "write ending at {end} overflows {resource:?} of {} bytes",
                host.desc.size
            )));
        }

        let (Ok(start), Ok(end)) = (usize::try_from(offset), usize::try_from(end)) else {
            return Err(RenderError::Device(format!(
                "write ending at {end} exceeds host memory"
            )));
        };
        if host.data.len() < end {
            host.data.resize(end, 0);
        }
        host.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn blas_prebuild_info(&self, geometries: &[BlasGeometry]) -> PrebuildInfo {
        let triangles: u64 = geometries
            .iter()
            .map(|g| u64::from(g.desc.triangle_count()))
            .sum();
        PrebuildInfo {
            result_size: 256 + triangles * 64,
            scratch_size: 256 + triangles * 32,
        }
    }

    fn build_blas(
        &self,
        geometries: &[BlasGeometry],
        destination: RawResource,
        scratch: RawResource,
    ) -> RenderResult<()> {
        self.check_build()?;
        let info = self.blas_prebuild_info(geometries);

        let mut state = self.state.lock();
        expect_kind(
            &state,
            destination,
            &[ResourceKind::AccelerationStructure],
            info.result_size,
        )?;
        expect_kind(&state, scratch, &[ResourceKind::Scratch], info.scratch_size)?;
        for geometry in geometries {
            expect_kind(&state, geometry.index_buffer, &[ResourceKind::Buffer], 0)?;
            expect_kind(&state, geometry.vertex_buffer, &[ResourceKind::Buffer], 0)?;
        }

        trace!(?destination, geometries = geometries.len(), "headless blas build");
        state.blas_builds.push(BlasBuild {
            destination,
            scratch,
            geometries: geometries.iter().map(|g| g.desc).collect(),
            opaque: geometries.iter().map(|g| g.opaque).collect(),
        });
        Ok(())
    }

    fn tlas_prebuild_info(&self, instance_count: u32) -> PrebuildInfo {
        PrebuildInfo {
            result_size: 256 + u64::from(instance_count) * 128,
            scratch_size: 256 + u64::from(instance_count) * 64,
        }
    }

    fn build_tlas(
        &self,
        instances: RawResource,
        instance_count: u32,
        destination: RawResource,
        scratch: RawResource,
    ) -> RenderResult<()> {
        self.check_build()?;
        let info = self.tlas_prebuild_info(instance_count);
        let bytes = instance_count as usize * TlasInstance::SIZE;

        let mut state = self.state.lock();
        expect_kind(
            &state,
            destination,
            &[ResourceKind::AccelerationStructure],
            info.result_size,
        )?;
        expect_kind(&state, scratch, &[ResourceKind::Scratch], info.scratch_size)?;
        expect_kind(&state, instances, &[ResourceKind::InstanceDescs], bytes as u64)?;

        let data = &state.resources[&instances].data;
        if data.len() < bytes {
            return Err(RenderError::Device(format!(
                "{instances:?} holds {} written bytes, {bytes} needed",
                data.len()
            )));
        }
        let decoded: Vec<TlasInstance> = data[..bytes]
            .chunks_exact(TlasInstance::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect();

        for instance in &decoded {
            let live = instance
                .blas_address
                .checked_sub(ADDRESS_BASE)
                .map(|offset| RawResource(offset / ADDRESS_STRIDE))
                .and_then(|resource| state.resources.get(&resource))
                .is_some_and(|host| host.desc.kind == ResourceKind::AccelerationStructure);
            if !live {
                return Err(RenderError::Device(format!(
                    "instance {} references a dead structure",
                    instance.instance_id()
                )));
            }
        }

        state.tlas_builds.push(TlasBuild {
            destination,
            instances: decoded,
        });
        Ok(())
    }

    fn blas_address(&self, resource: RawResource) -> u64 {
        ADDRESS_BASE + resource.0 * ADDRESS_STRIDE
    }

    fn render(&self, inputs: &FrameInputs<'_>) -> RenderResult<()> {
        let mut state = self.state.lock();
        expect_kind(
            &state,
            inputs.tlas,
            &[ResourceKind::AccelerationStructure],
            0,
        )?;
        expect_kind(&state, inputs.frame_constants, &[ResourceKind::Buffer], 0)?;

        state.frames.push(RenderedFrame {
            frame: inputs.frame,
            tlas: inputs.tlas,
            instance_count: inputs.instance_count,
            previous_transforms: inputs.previous_transforms.to_vec(),
            reset_accumulation: inputs.reset_accumulation,
        });
        Ok(())
    }

    fn present(&self) -> RenderResult<()> {
        self.state.lock().presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TlasInstanceFlags;
    use raybridge_shared::IDENTITY_TRANSFORM;

    #[test]
    fn test_write_bounds() {
        let device = HeadlessDevice::new();
        let buffer = device.create_committed(&ResourceDesc::buffer(8)).unwrap();

        device.write_resource(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.resource_data(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.write_resource(buffer, 6, &[0; 4]).is_err());
    }

    #[test]
    fn test_allocation_failure_injection() {
        let device = HeadlessDevice::new();
        device.fail_next_allocations(2);

        assert!(device.create_heap(1024).is_err());
        assert!(device.create_committed(&ResourceDesc::buffer(16)).is_err());
        assert!(device.create_committed(&ResourceDesc::buffer(16)).is_ok());
    }

    #[test]
    fn test_placed_resource_must_fit() {
        let device = HeadlessDevice::new();
        let heap = device.create_heap(1024).unwrap();

        assert!(device.create_placed(heap, 512, &ResourceDesc::buffer(512)).is_ok());
        assert!(device.create_placed(heap, 768, &ResourceDesc::buffer(512)).is_err());
    }

    #[test]
    fn test_tlas_rejects_dead_structure() {
        let device = HeadlessDevice::new();
        let blas = device
            .create_committed(&ResourceDesc::acceleration_structure(1024))
            .unwrap();
        let descs = device
            .create_committed(&ResourceDesc::instance_descs(64))
            .unwrap();
        let tlas = device
            .create_committed(&ResourceDesc::acceleration_structure(1024))
            .unwrap();
        let scratch = device.create_committed(&ResourceDesc::scratch(1024)).unwrap();

        let instance = TlasInstance::new(
            IDENTITY_TRANSFORM,
            0,
            1,
            TlasInstanceFlags::empty(),
            device.blas_address(blas),
        );
        device
            .write_resource(descs, 0, bytemuck::bytes_of(&instance))
            .unwrap();
        device.build_tlas(descs, 1, tlas, scratch).unwrap();
        assert_eq!(device.last_tlas().unwrap().instances, vec![instance]);
        assert_eq!(device.resource_at(instance.blas_address), Some(blas));

        device.destroy_resource(blas);
        assert!(device.build_tlas(descs, 1, tlas, scratch).is_err());
    }
}
