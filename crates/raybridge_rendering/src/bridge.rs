//! Render Bridge - turns the producer's records into traced frames.
//!
//! This is the ONLY place records touch the device. Everything the producer
//! names by identifier is resolved here.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use raybridge_core::{
    ChannelError, ChannelReceiver, Chunk, GpuAllocator, GpuMemory, RawResource, ResourceDesc,
    SubAllocatorConfig,
};
use raybridge_shared::{
    BufferUsage, CreateBuffer, CreateTexture, DrawInstance, FrameEnd, GeometryDesc, GeometryFlags,
    IndexFormat, ProtocolError, Record,
};
use tracing::{debug, error, info, trace, warn};

use crate::accel::{
    BlasCache, BlasCacheConfig, GeometrySource, TopLevelBuilder, DEFAULT_EVICTION_FRAMES,
    DEFAULT_SCRATCH_ALIGNMENT,
};
use crate::device::{FrameInputs, RaytracingDevice};
use crate::error::{RenderError, RenderResult};
use crate::scene::{
    texture_size, Material, MeshEntry, MeshKey, ResourceEntry, ResourceShape, Scene,
};
use crate::upload::{UploadStats, UploadWorker};

/// Default number of writes waiting for the upload thread.
pub const DEFAULT_UPLOAD_QUEUE_DEPTH: usize = 256;

/// Configuration for the render bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBridgeConfig {
    /// Frames an undrawn bottom-level structure survives; `0` never evicts
    pub eviction_frames: u64,
    /// Alignment of shared build scratch
    pub scratch_alignment: u64,
    /// Wait for the frame's uploads before building
    pub sync_uploads: bool,
    /// Writes waiting for the upload thread before the render thread blocks
    pub upload_queue_depth: usize,
    /// GPU memory pooling
    pub memory: SubAllocatorConfig,
}

impl Default for RenderBridgeConfig {
    fn default() -> Self {
        Self {
            eviction_frames: DEFAULT_EVICTION_FRAMES,
            scratch_alignment: DEFAULT_SCRATCH_ALIGNMENT,
            sync_uploads: true,
            upload_queue_depth: DEFAULT_UPLOAD_QUEUE_DEPTH,
            memory: SubAllocatorConfig::default(),
        }
    }
}

impl RenderBridgeConfig {
    /// Sets the eviction age in frames.
    #[must_use]
    pub const fn with_eviction_frames(mut self, frames: u64) -> Self {
        self.eviction_frames = frames;
        self
    }

    /// Sets the scratch alignment.
    #[must_use]
    pub const fn with_scratch_alignment(mut self, alignment: u64) -> Self {
        self.scratch_alignment = alignment;
        self
    }

    /// Sets whether builds wait for uploads.
    #[must_use]
    pub const fn with_sync_uploads(mut self, sync: bool) -> Self {
        self.sync_uploads = sync;
        self
    }

    /// Sets the GPU memory pooling.
    #[must_use]
    pub const fn with_memory(mut self, memory: SubAllocatorConfig) -> Self {
        self.memory = memory;
        self
    }
}

/// Statistics from one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderBridgeStats {
    /// Producer frame number
    pub frame: u64,
    /// Chunks that carried the frame
    pub chunks: u32,
    /// Records applied, `FrameEnd` included
    pub records_applied: u32,
    /// Resources whose creation failed
    pub failed_resources: u32,
    /// Draws of mesh elements that do not exist
    pub draws_dropped: u32,
    /// Bottom-level structures built or rebuilt
    pub blas_built: u32,
    /// Mesh elements served by an existing structure
    pub blas_reused: u32,
    /// Bottom-level builds postponed
    pub blas_deferred: u32,
    /// Bottom-level structures evicted
    pub blas_evicted: u32,
    /// Instances in the top-level structure
    pub instances_emitted: u32,
    /// Draws skipped because their structure was not built
    pub instances_skipped: u32,
}

/// Per-frame constants read by the shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FrameConstants {
    /// Producer frame number
    pub frame: u64,
    /// Instances in the top-level structure
    pub instance_count: u32,
    /// Non-zero after a camera cut
    pub reset_accumulation: u32,
}

impl FrameConstants {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Buffers are resident once created and no write to them is in flight.
struct Residency<'a> {
    scene: &'a Scene,
    uploads: &'a UploadWorker,
}

impl GeometrySource for Residency<'_> {
    fn resident_buffer(&self, id: u64) -> Option<RawResource> {
        self.scene
            .resources
            .get(id)
            .filter(|entry| entry.is_buffer() && !self.uploads.is_pending(id))
            .map(|entry| entry.raw)
    }

    fn effective_flags(&self, desc: &GeometryDesc) -> GeometryFlags {
        self.scene.effective_flags(desc)
    }
}

/// The consumer: applies records, builds acceleration structures and
/// renders one frame per `FrameEnd`.
///
/// IMPORTANT: driven from one thread. The upload worker is the only other
/// thread touching the device, and only through `write_resource`.
///
/// ## Usage
///
/// ```rust,ignore
/// let device = Arc::new(HeadlessDevice::new());
/// let mut bridge = RenderBridge::new(device, RenderBridgeConfig::default())?;
///
/// let link = BridgeLink::open(&namespace, Role::Consumer)?;
/// let mut receiver = ChannelReceiver::new(link);
/// let frames = bridge.run(&mut receiver, None)?;
/// ```
pub struct RenderBridge<D: RaytracingDevice + 'static> {
    config: RenderBridgeConfig,
    device: Arc<D>,
    allocator: GpuAllocator,
    scene: Scene,
    blas: BlasCache,
    tlas: TopLevelBuilder,
    uploads: UploadWorker,
    frame_constants: RawResource,
    frame_index: u64,
    stats: RenderBridgeStats,
    last_stats: RenderBridgeStats,
}

impl<D: RaytracingDevice + 'static> RenderBridge<D> {
    /// Checks the device and sets up the consumer.
    ///
    /// # Errors
    ///
    /// `RenderError::Unsupported` if the device is below a minimum; any
    /// failure to create the startup resources. Both are fatal.
    pub fn new(device: Arc<D>, config: RenderBridgeConfig) -> RenderResult<Self> {
        let capabilities = device.capabilities();
        if let Err(e) = capabilities.check() {
            error!(adapter = %capabilities.adapter, error = %e, "device rejected");
            return Err(e);
        }
        info!(
            adapter = %capabilities.adapter,
            raytracing_tier = %capabilities.raytracing_tier,
            shader_model = %capabilities.shader_model,
            "ray-tracing device accepted"
        );

        let memory = Arc::clone(&device) as Arc<dyn GpuMemory>;
        let allocator = GpuAllocator::new(memory, config.memory);

        let frame_constants = {
            let _bootstrap = allocator.bootstrap();
            allocator
                .create_resource(&ResourceDesc::buffer(FrameConstants::SIZE as u64))
                .map_err(|e| RenderError::Device(format!("frame constants: {e}")))?
        };

        let uploads = UploadWorker::spawn(Arc::clone(&device), config.upload_queue_depth)?;
        let blas = BlasCache::new(BlasCacheConfig {
            eviction_frames: config.eviction_frames,
            scratch_alignment: config.scratch_alignment,
        });

        Ok(Self {
            config,
            device,
            allocator,
            scene: Scene::new(),
            blas,
            tlas: TopLevelBuilder::new(),
            uploads,
            frame_constants,
            frame_index: 0,
            stats: RenderBridgeStats::default(),
            last_stats: RenderBridgeStats::default(),
        })
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &RenderBridgeConfig {
        &self.config
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// The GPU allocator.
    #[must_use]
    pub const fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    /// Consumer-side tables.
    #[must_use]
    pub const fn scene(&self) -> &Scene {
        &self.scene
    }

    /// The bottom-level cache.
    #[must_use]
    pub const fn blas_cache(&self) -> &BlasCache {
        &self.blas
    }

    /// Statistics of the last finished frame.
    #[must_use]
    pub const fn stats(&self) -> RenderBridgeStats {
        self.last_stats
    }

    /// Upload counters.
    #[must_use]
    pub const fn upload_stats(&self) -> UploadStats {
        self.uploads.stats()
    }

    /// Frames finished so far.
    #[must_use]
    pub const fn frames_finished(&self) -> u64 {
        self.frame_index
    }

    /// Applies one record.
    ///
    /// # Errors
    ///
    /// `RenderError::Alloc` when a resource cannot be created; the bridge
    /// carries on. Anything else is fatal.
    pub fn apply(&mut self, record: Record) -> RenderResult<()> {
        self.stats.records_applied += 1;
        match record {
            Record::CreateBuffer(create) => self.create_buffer(&create),
            Record::CreateTexture(create) => self.create_texture(&create),
            Record::WriteResource { id, offset, data } => self.write_resource(id, offset, data),
            Record::ReleaseResource(release) => self.release_resource(release.id),
            Record::CreateMaterial(create) => {
                let material = Material::from_record(&create);
                if self.scene.materials.insert(create.id, material) {
                    let dirty = self.blas.mark_material_dirty(create.id);
                    debug!(material = create.id, dirty, "material reclassified");
                }
                Ok(())
            }
            Record::CreateMesh {
                mesh,
                element,
                geometries,
            } => {
                self.create_mesh(MeshKey::new(mesh, element), geometries);
                Ok(())
            }
            Record::ReleaseMesh(release) => {
                self.release_mesh(MeshKey::new(release.mesh, release.element))
            }
            Record::DrawInstance(draw) => {
                self.draw(&draw);
                Ok(())
            }
            Record::FrameEnd(_) => Ok(()),
        }
    }

    /// Applies every record of a chunk in order.
    ///
    /// Returns the `FrameEnd` if the chunk closes a frame.
    ///
    /// # Errors
    ///
    /// The first fatal error. Resource creation failures are logged and
    /// skipped.
    pub fn apply_chunk(&mut self, chunk: Chunk) -> RenderResult<Option<FrameEnd>> {
        self.stats.chunks += 1;
        for record in chunk.records {
            match self.apply(record) {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => warn!(error = %e, "record dropped"),
                Err(e) => return Err(e),
            }
        }
        Ok(chunk.frame_end)
    }

    /// Builds and renders the frame closed by `end`.
    ///
    /// The frame is closed even when rendering fails: transform history
    /// advances and the statistics are published.
    ///
    /// # Errors
    ///
    /// `RenderError::Alloc` if top-level storage cannot grow; the frame is
    /// not rendered. Device failures are fatal.
    pub fn finish_frame(&mut self, end: &FrameEnd) -> RenderResult<RenderBridgeStats> {
        let outcome = self.trace_frame(end);

        self.scene.instances.end_frame();
        self.frame_index += 1;
        self.stats.frame = end.frame;
        self.last_stats = std::mem::take(&mut self.stats);

        debug!(
            frame = end.frame,
            records = self.last_stats.records_applied,
            blas_built = self.last_stats.blas_built,
            instances = self.last_stats.instances_emitted,
            skipped = self.last_stats.instances_skipped,
            "frame finished"
        );
        outcome.map(|()| self.last_stats)
    }

    /// Shows the last rendered frame.
    ///
    /// # Errors
    ///
    /// Device failure.
    pub fn present(&self) -> RenderResult<()> {
        self.device.present()
    }

    /// Runs the consumer loop until shutdown or `max_frames` frames.
    ///
    /// Per chunk: apply, then acknowledge. Per frame: apply, build, render,
    /// acknowledge, present, signal presentation.
    ///
    /// # Errors
    ///
    /// The first fatal error. Returns the number of frames on shutdown.
    pub fn run(&mut self, receiver: &mut ChannelReceiver, max_frames: Option<u64>) -> RenderResult<u64> {
        let mut frames = 0;
        while max_frames.map_or(true, |max| frames < max) {
            let chunk = match receiver.receive() {
                Ok(chunk) => chunk,
                Err(ChannelError::Shutdown) => {
                    info!(frames, "shutdown requested");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "channel failure");
                    return Err(e.into());
                }
            };

            let frame_end = self.apply_chunk(chunk).map_err(|e| {
                error!(error = %e, "fatal record");
                e
            })?;
            let Some(end) = frame_end else {
                receiver.acknowledge();
                continue;
            };

            match self.finish_frame(&end) {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => warn!(frame = end.frame, error = %e, "frame not rendered"),
                Err(e) => {
                    error!(frame = end.frame, error = %e, "fatal frame failure");
                    return Err(e);
                }
            }
            receiver.acknowledge();
            self.present()?;
            receiver.present();
            frames += 1;
        }
        Ok(frames)
    }

    fn trace_frame(&mut self, end: &FrameEnd) -> RenderResult<()> {
        if self.config.sync_uploads {
            self.uploads.wait_idle()?;
        } else {
            self.uploads.collect()?;
        }

        self.stats.blas_evicted = self.blas.evict(self.frame_index, &self.allocator);

        let residency = Residency {
            scene: &self.scene,
            uploads: &self.uploads,
        };
        let report = self
            .blas
            .build_pending(&residency, &*self.device, &self.allocator)?;
        self.stats.blas_built = report.built;
        self.stats.blas_deferred = report.deferred;

        let tlas = self.tlas.build(
            self.scene.instances.current(),
            &self.blas,
            &*self.device,
            &self.allocator,
        )?;
        self.stats.instances_emitted = tlas.emitted;
        self.stats.instances_skipped = tlas.skipped;

        let constants = FrameConstants {
            frame: end.frame,
            instance_count: tlas.emitted,
            reset_accumulation: end.reset_accumulation,
        };
        self.device
            .write_resource(self.frame_constants, 0, bytemuck::bytes_of(&constants))?;

        self.device.render(&FrameInputs {
            frame: end.frame,
            tlas: tlas.tlas,
            instance_count: tlas.emitted,
            previous_transforms: self.tlas.previous_transforms(),
            frame_constants: self.frame_constants,
            reset_accumulation: end.reset_accumulation != 0,
        })
    }

    fn create_buffer(&mut self, create: &CreateBuffer) -> RenderResult<()> {
        let shape = ResourceShape::Buffer {
            usage: BufferUsage::from_bits_truncate(create.usage),
            index_format: IndexFormat::from_u32(create.index_format).unwrap_or_default(),
        };
        self.create_resource(create.id, ResourceDesc::buffer(create.byte_size), shape)
    }

    fn create_texture(&mut self, create: &CreateTexture) -> RenderResult<()> {
        create.validate()?;
        let size = texture_size(create.width, create.height, create.levels, create.texel_size)
            .ok_or(ProtocolError::InvalidTexture {
                id: create.id,
                reason: "mip chain size overflows",
            })?;
        let shape = ResourceShape::Texture {
            width: create.width,
            height: create.height,
            levels: create.levels,
        };
        self.create_resource(create.id, ResourceDesc::texture(size), shape)
    }

    fn create_resource(&mut self, id: u64, desc: ResourceDesc, shape: ResourceShape) -> RenderResult<()> {
        if self.scene.resources.contains(id) {
            return Err(RenderError::DuplicateResource(id));
        }

        match self.allocator.create_resource(&desc) {
            Ok(raw) => {
                trace!(id, ?raw, size = desc.size, "resource created");
                self.scene.resources.insert(
                    id,
                    ResourceEntry {
                        raw,
                        size: desc.size,
                        shape,
                        writes: 0,
                    },
                )
            }
            Err(source) => {
                self.scene.resources.mark_failed(id)?;
                self.stats.failed_resources += 1;
                Err(RenderError::Alloc { id, source })
            }
        }
    }

    fn write_resource(&mut self, id: u64, offset: u64, data: Vec<u8>) -> RenderResult<()> {
        let Some(entry) = self.scene.resources.get_mut(id) else {
            if self.scene.resources.is_failed(id) {
                trace!(id, "write to failed resource dropped");
                return Ok(());
            }
            return Err(RenderError::UnknownResource(id));
        };

        let len = data.len() as u64;
        if offset.checked_add(len).map_or(true, |end| end > entry.size) {
            return Err(RenderError::WriteOutOfBounds {
                id,
                offset,
                len,
                size: entry.size,
            });
        }

        entry.writes += 1;
        let (raw, is_buffer) = (entry.raw, entry.is_buffer());
        self.uploads.submit(id, raw, offset, data)?;

        if is_buffer {
            let dirty = self.blas.mark_buffer_dirty(id);
            if dirty > 0 {
                trace!(id, dirty, "buffer write dirtied structures");
            }
        }
        Ok(())
    }

    fn release_resource(&mut self, id: u64) -> RenderResult<()> {
        self.uploads.flush_resource(id)?;
        match self.scene.resources.remove(id)? {
            Some(entry) => {
                self.allocator.free(entry.raw);
                trace!(id, "resource released");
            }
            None => debug!(id, "release of failed resource"),
        }
        Ok(())
    }

    fn create_mesh(&mut self, key: MeshKey, geometries: Vec<GeometryDesc>) {
        let (blas, reused) = self.blas.acquire(&geometries, self.frame_index);
        if reused {
            self.stats.blas_reused += 1;
        }
        if let Some(previous) = self.scene.meshes.insert(key, MeshEntry { geometries, blas }) {
            self.blas.release(previous.blas);
        }
    }

    fn release_mesh(&mut self, key: MeshKey) -> RenderResult<()> {
        let entry = self
            .scene
            .meshes
            .remove(key)
            .ok_or(RenderError::UnknownMesh {
                mesh: key.mesh,
                element: key.element,
            })?;
        self.blas.release(entry.blas);
        self.scene.instances.forget_mesh(key);
        Ok(())
    }

    fn draw(&mut self, draw: &DrawInstance) {
        let key = MeshKey::new(draw.mesh, draw.element);
        match self.scene.meshes.get(key) {
            Some(entry) => {
                let blas = entry.blas;
                self.blas.touch(blas, self.frame_index);
                self.scene.instances.push(key, blas, draw.transform);
            }
            None => {
                warn!(mesh = %key, "draw of unknown mesh dropped");
                self.stats.draws_dropped += 1;
            }
        }
    }
}

impl<D: RaytracingDevice + 'static> Drop for RenderBridge<D> {
    fn drop(&mut self) {
        self.uploads.shutdown();
        self.tlas.release(&self.allocator);
        self.blas.clear(&self.allocator);
        for (_, entry) in self.scene.resources.drain() {
            self.allocator.free(entry.raw);
        }
        self.device.destroy_resource(self.frame_constants);
        debug!(frames = self.frame_index, "render bridge torn down");
    }
}
