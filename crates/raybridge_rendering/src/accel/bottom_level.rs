//! Bottom-level structure cache.
//!
//! One entry per distinct geometry content. Mesh elements with identical
//! descriptors share an entry and its single build.
//!
//! ```text
//!            first reference,            buffer write or
//!            buffers resident            material change
//! Unbuilt ─────────────────────► Built ─────────────────► Dirty
//!    ▲                            ▲  │                       │ build pass
//!    │ drawn again                │  │ not drawn for         ▼
//!    │                            │  │ eviction_frames   Rebuilding
//! Evicted ◄───────────────────────┼──┘                       │
//!                                 └──────────────────────────┘
//! ```

use std::collections::HashMap;
use std::hash::Hasher;

use bitflags::bitflags;
use raybridge_core::memory::align_up;
use raybridge_core::{GpuAllocator, RawResource, ResourceDesc};
use raybridge_shared::{GeometryDesc, GeometryFlags};
use siphasher::sip128::{Hasher128, SipHasher24};
use tracing::{debug, trace, warn};

use crate::device::{BlasGeometry, PrebuildInfo, RaytracingDevice, TlasInstanceFlags};
use crate::error::RenderResult;

/// Fixed SipHash keys; the content key must be stable for the process lifetime only.
const HASH_KEYS: (u64, u64) = (0x7261_7962_7269_6467, 0x6765_6f6d_6574_7279);

/// Default frames an undrawn structure survives.
pub const DEFAULT_EVICTION_FRAMES: u64 = 120;

/// Default scratch alignment.
pub const DEFAULT_SCRATCH_ALIGNMENT: u64 = 256;

/// Content key of a bottom-level structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlasKey(pub u128);

impl BlasKey {
    /// Hashes the descriptors of a mesh element.
    #[must_use]
    pub fn of(geometries: &[GeometryDesc]) -> Self {
        let mut hasher = SipHasher24::new_with_keys(HASH_KEYS.0, HASH_KEYS.1);
        hasher.write_usize(geometries.len());
        hasher.write(bytemuck::cast_slice(geometries));
        let hash = hasher.finish128();
        Self((u128::from(hash.h1) << 64) | u128::from(hash.h2))
    }
}

bitflags! {
    /// Ray visibility classes. Rays pick the classes they can hit.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InstanceMask: u8 {
        /// Opaque and alpha-tested geometry
        const OPAQUE_PUNCH = 1 << 0;
        /// Alpha-blended geometry
        const TRANSPARENT = 1 << 1;
        /// Sky, water and other special surfaces
        const SPECIAL = 1 << 2;
    }
}

impl InstanceMask {
    /// Visibility class of one geometry.
    #[must_use]
    pub fn classify(flags: GeometryFlags) -> Self {
        if flags.contains(GeometryFlags::SPECIAL) {
            Self::SPECIAL
        } else if flags.contains(GeometryFlags::TRANSPARENT) {
            Self::TRANSPARENT
        } else {
            Self::OPAQUE_PUNCH
        }
    }
}

/// Lifecycle of a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlasState {
    /// Never built, or rebuilt after eviction
    Unbuilt,
    /// Up to date and traceable
    Built,
    /// Source changed since the last build
    Dirty,
    /// Build in progress
    Rebuilding,
    /// Storage released
    Evicted,
}

/// Where the cache finds buffers and classifications at build time.
pub trait GeometrySource {
    /// Device handle of buffer `id` if its contents are final.
    fn resident_buffer(&self, id: u64) -> Option<RawResource>;

    /// Classification of a geometry including its material.
    fn effective_flags(&self, desc: &GeometryDesc) -> GeometryFlags;
}

/// One cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlasEntry {
    geometries: Vec<GeometryDesc>,
    state: BlasState,
    resource: Option<RawResource>,
    result_size: u64,
    address: u64,
    mask: InstanceMask,
    instance_flags: TlasInstanceFlags,
    refs: u32,
    last_used: u64,
    builds: u32,
    sequence: u64,
}

impl BlasEntry {
    /// Descriptors the structure is built from.
    #[must_use]
    pub fn geometries(&self) -> &[GeometryDesc] {
        &self.geometries
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BlasState {
        self.state
    }

    /// Result storage, while built or dirty.
    #[must_use]
    pub const fn resource(&self) -> Option<RawResource> {
        self.resource
    }

    /// Device address of the last build.
    #[must_use]
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Visibility classes of the last build.
    #[must_use]
    pub const fn mask(&self) -> InstanceMask {
        self.mask
    }

    /// Flags instances of this structure are emitted with.
    #[must_use]
    pub const fn instance_flags(&self) -> TlasInstanceFlags {
        self.instance_flags
    }

    /// Mesh elements referencing the entry.
    #[must_use]
    pub const fn refs(&self) -> u32 {
        self.refs
    }

    /// Times the entry was built.
    #[must_use]
    pub const fn builds(&self) -> u32 {
        self.builds
    }

    /// Any referenced entry that is unbuilt or dirty is built, drawn or
    /// not: a combination is built the first frame a mesh element names
    /// it, so its first draw never waits a frame.
    fn needs_build(&self) -> bool {
        self.refs > 0 && matches!(self.state, BlasState::Unbuilt | BlasState::Dirty)
    }

    fn uses_buffer(&self, id: u64) -> bool {
        self.geometries
            .iter()
            .any(|g| g.index_buffer == id || g.vertex_buffer == id)
    }
}

/// Cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlasCacheConfig {
    /// Frames without a draw before storage is released; `0` never evicts
    pub eviction_frames: u64,
    /// Scratch allocation alignment
    pub scratch_alignment: u64,
}

impl Default for BlasCacheConfig {
    fn default() -> Self {
        Self {
            eviction_frames: DEFAULT_EVICTION_FRAMES,
            scratch_alignment: DEFAULT_SCRATCH_ALIGNMENT,
        }
    }
}

/// Cumulative cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlasCacheStats {
    /// First builds
    pub built: u64,
    /// Rebuilds of dirty entries
    pub rebuilt: u64,
    /// Mesh elements that found their content already cached
    pub reused: u64,
    /// Builds postponed to a later frame
    pub deferred: u64,
    /// Entries whose storage was released
    pub evicted: u64,
}

/// Outcome of one build pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Entries built or rebuilt
    pub built: u32,
    /// Entries left for a later frame
    pub deferred: u32,
    /// Scratch bytes shared by the pass
    pub scratch_size: u64,
}

struct PendingBuild {
    key: BlasKey,
    geometries: Vec<BlasGeometry>,
    mask: InstanceMask,
    info: PrebuildInfo,
}

/// Content-keyed bottom-level structures. Driven from the render thread only.
#[derive(Debug, Default)]
pub struct BlasCache {
    config: BlasCacheConfig,
    entries: HashMap<BlasKey, BlasEntry>,
    next_sequence: u64,
    stats: BlasCacheStats,
}

impl BlasCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: BlasCacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Tuning.
    #[must_use]
    pub const fn config(&self) -> &BlasCacheConfig {
        &self.config
    }

    /// Cumulative counters.
    #[must_use]
    pub const fn stats(&self) -> BlasCacheStats {
        self.stats
    }

    /// Entries, in any state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// An entry.
    #[must_use]
    pub fn get(&self, key: BlasKey) -> Option<&BlasEntry> {
        self.entries.get(&key)
    }

    /// State of an entry.
    #[must_use]
    pub fn state(&self, key: BlasKey) -> Option<BlasState> {
        self.entries.get(&key).map(BlasEntry::state)
    }

    /// Adds a reference from a mesh element.
    ///
    /// Returns the key and whether the content was already cached.
    pub fn acquire(&mut self, geometries: &[GeometryDesc], frame: u64) -> (BlasKey, bool) {
        let key = BlasKey::of(geometries);
        let mut reused = true;
        let sequence = self.next_sequence;
        let entry = self.entries.entry(key).or_insert_with(|| {
            reused = false;
            BlasEntry {
                geometries: geometries.to_vec(),
                state: BlasState::Unbuilt,
                resource: None,
                result_size: 0,
                address: 0,
                mask: InstanceMask::empty(),
                instance_flags: TlasInstanceFlags::empty(),
                refs: 0,
                last_used: frame,
                builds: 0,
                sequence,
            }
        });
        entry.refs += 1;
        if entry.state == BlasState::Evicted {
            entry.state = BlasState::Unbuilt;
            entry.last_used = frame;
        }

        if reused {
            self.stats.reused += 1;
        } else {
            self.next_sequence += 1;
        }
        (key, reused)
    }

    /// Drops a reference from a mesh element.
    pub fn release(&mut self, key: BlasKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    /// Notes a draw of the entry this frame.
    pub fn touch(&mut self, key: BlasKey, frame: u64) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used = frame;
            if entry.state == BlasState::Evicted {
                entry.state = BlasState::Unbuilt;
            }
        }
    }

    /// Marks built entries reading buffer `id` dirty; returns how many.
    pub fn mark_buffer_dirty(&mut self, id: u64) -> usize {
        self.mark_dirty(|entry| entry.uses_buffer(id))
    }

    /// Marks built entries using `material` dirty; returns how many.
    pub fn mark_material_dirty(&mut self, material: u64) -> usize {
        self.mark_dirty(|entry| entry.geometries.iter().any(|g| g.material == material))
    }

    fn mark_dirty(&mut self, mut affected: impl FnMut(&BlasEntry) -> bool) -> usize {
        let mut marked = 0;
        for entry in self.entries.values_mut() {
            if entry.state == BlasState::Built && affected(entry) {
                entry.state = BlasState::Dirty;
                marked += 1;
            }
        }
        marked
    }

    /// Releases storage of entries not drawn for `eviction_frames`.
    ///
    /// Entries nobody references any more are dropped outright.
    pub fn evict(&mut self, frame: u64, allocator: &GpuAllocator) -> u32 {
        let limit = self.config.eviction_frames;
        if limit == 0 {
            return 0;
        }

        let mut evicted: u32 = 0;
        self.entries.retain(|key, entry| {
            if frame.saturating_sub(entry.last_used) < limit {
                return true;
            }
            if let Some(resource) = entry.resource.take() {
                allocator.free(resource);
                entry.state = BlasState::Evicted;
                evicted = evicted.saturating_add(1);
                trace!(?key, "evicted bottom-level structure");
            }
            entry.refs > 0
        });

        self.stats.evicted += u64::from(evicted);
        evicted
    }

    /// Builds every referenced entry that is unbuilt or dirty.
    ///
    /// Entries whose buffers are not resident, or whose storage cannot be
    /// allocated, stay as they are and are counted as deferred.
    ///
    /// # Errors
    ///
    /// A device build failure, which is fatal.
    pub fn build_pending<S, D>(
        &mut self,
        source: &S,
        device: &D,
        allocator: &GpuAllocator,
    ) -> RenderResult<BuildReport>
    where
        S: GeometrySource + ?Sized,
        D: RaytracingDevice + ?Sized,
    {
        let mut report = BuildReport::default();

        let mut pending: Vec<(u64, BlasKey)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.needs_build())
            .map(|(key, entry)| (entry.sequence, *key))
            .collect();
        pending.sort_unstable();

        let mut batch = Vec::with_capacity(pending.len());
        for (_, key) in pending {
            match self.resolve(key, source) {
                Some((geometries, mask)) => {
                    let info = device.blas_prebuild_info(&geometries);
                    batch.push(PendingBuild {
                        key,
                        geometries,
                        mask,
                        info,
                    });
                }
                None => report.deferred += 1,
            }
        }

        if !batch.is_empty() {
            let worst = batch.iter().map(|b| b.info.scratch_size).max().unwrap_or(0);
            report.scratch_size = align_up(worst, self.config.scratch_alignment);

            match allocator.create_resource(&ResourceDesc::scratch(report.scratch_size)) {
                Ok(scratch) => {
                    let built = self.build_batch(&batch, scratch, device, allocator, &mut report);
                    allocator.free(scratch);
                    built?;
                }
                Err(error) => {
                    warn!(%error, builds = batch.len(), "no scratch, deferring builds");
                    let count = u32::try_from(batch.len()).unwrap_or(u32::MAX);
                    report.deferred = report.deferred.saturating_add(count);
                }
            }
        }

        self.stats.deferred += u64::from(report.deferred);
        if report.built > 0 || report.deferred > 0 {
            debug!(
                built = report.built,
                deferred = report.deferred,
                scratch = report.scratch_size,
                "bottom-level build pass"
            );
        }
        Ok(report)
    }

    /// Releases every entry's storage.
    pub fn clear(&mut self, allocator: &GpuAllocator) {
        for (_, entry) in self.entries.drain() {
            if let Some(resource) = entry.resource {
                allocator.free(resource);
            }
        }
    }

    fn resolve<S>(&self, key: BlasKey, source: &S) -> Option<(Vec<BlasGeometry>, InstanceMask)>
    where
        S: GeometrySource + ?Sized,
    {
        let entry = self.entries.get(&key)?;
        let mut mask = InstanceMask::empty();
        let mut geometries = Vec::with_capacity(entry.geometries.len());

        for desc in &entry.geometries {
            let index_buffer = source.resident_buffer(desc.index_buffer)?;
            let vertex_buffer = source.resident_buffer(desc.vertex_buffer)?;
            let flags = source.effective_flags(desc);
            mask |= InstanceMask::classify(flags);
            geometries.push(BlasGeometry {
                index_buffer,
                vertex_buffer,
                desc: *desc,
                opaque: flags.is_empty(),
            });
        }
        Some((geometries, mask))
    }

    fn build_batch<D>(
        &mut self,
        batch: &[PendingBuild],
        scratch: RawResource,
        device: &D,
        allocator: &GpuAllocator,
        report: &mut BuildReport,
    ) -> RenderResult<()>
    where
        D: RaytracingDevice + ?Sized,
    {
        for build in batch {
            let Some(entry) = self.entries.get_mut(&build.key) else {
                continue;
            };

            let in_place = entry
                .resource
                .filter(|_| entry.result_size >= build.info.result_size);
            let destination = match in_place {
                Some(resource) => resource,
                None => {
                    let desc = ResourceDesc::acceleration_structure(build.info.result_size);
                    match allocator.create_resource(&desc) {
                        Ok(resource) => resource,
                        Err(error) => {
                            warn!(key = ?build.key, %error, "no storage, deferring build");
                            report.deferred += 1;
                            continue;
                        }
                    }
                }
            };

            let rebuild = entry.state == BlasState::Dirty;
            if rebuild {
                entry.state = BlasState::Rebuilding;
            }

            if let Err(error) = device.build_blas(&build.geometries, destination, scratch) {
                if in_place.is_none() {
                    allocator.free(destination);
                }
                return Err(error);
            }

            if in_place.is_none() {
                if let Some(old) = entry.resource.replace(destination) {
                    allocator.free(old);
                }
                entry.result_size = build.info.result_size;
            }

            let opaque = build.geometries.iter().all(|g| g.opaque);
            entry.state = BlasState::Built;
            entry.address = device.blas_address(destination);
            entry.mask = build.mask;
            entry.instance_flags = if opaque {
                TlasInstanceFlags::FORCE_OPAQUE
            } else {
                TlasInstanceFlags::empty()
            };
            entry.builds += 1;
            report.built += 1;

            if rebuild {
                self.stats.rebuilt += 1;
            } else {
                self.stats.built += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use raybridge_core::{GpuMemory, SubAllocatorConfig};

    use crate::device::HeadlessDevice;

    #[derive(Default)]
    struct Buffers {
        resident: HashMap<u64, RawResource>,
        transparent: HashSet<u64>,
    }

    impl GeometrySource for Buffers {
        fn resident_buffer(&self, id: u64) -> Option<RawResource> {
            self.resident.get(&id).copied()
        }

        fn effective_flags(&self, desc: &GeometryDesc) -> GeometryFlags {
            let mut flags = desc.geometry_flags();
            if self.transparent.contains(&desc.material) {
                flags |= GeometryFlags::TRANSPARENT;
            }
            flags
        }
    }

    struct Fixture {
        device: Arc<HeadlessDevice>,
        allocator: GpuAllocator,
        buffers: Buffers,
    }

    impl Fixture {
        fn new() -> Self {
            let device = Arc::new(HeadlessDevice::new());
            let memory: Arc<dyn GpuMemory> = Arc::clone(&device) as Arc<dyn GpuMemory>;
            let allocator = GpuAllocator::new(
                memory,
                SubAllocatorConfig::default().with_block_size(1 << 20),
            );
            Self {
                device,
                allocator,
                buffers: Buffers::default(),
            }
        }

        fn make_resident(&mut self, id: u64) {
            let raw = self
                .allocator
                .create_resource(&ResourceDesc::buffer(4096))
                .unwrap();
            self.buffers.resident.insert(id, raw);
        }

        fn build(&self, cache: &mut BlasCache) -> BuildReport {
            cache
                .build_pending(&self.buffers, &*self.device, &self.allocator)
                .unwrap()
        }
    }

    fn geometry(index_buffer: u64, vertex_buffer: u64, material: u64) -> GeometryDesc {
        GeometryDesc {
            index_buffer,
            vertex_buffer,
            material,
            index_count: 36,
            vertex_count: 24,
            vertex_stride: 32,
            ..GeometryDesc::default()
        }
    }

    #[test]
    fn test_key_depends_on_content_only() {
        let a = [geometry(1, 2, 3)];
        let b = [geometry(1, 2, 3)];
        let c = [geometry(1, 2, 4)];
        assert_eq!(BlasKey::of(&a), BlasKey::of(&b));
        assert_ne!(BlasKey::of(&a), BlasKey::of(&c));
        assert_ne!(BlasKey::of(&a), BlasKey::of(&[a[0], a[0]]));
    }

    #[test]
    fn test_identical_content_builds_once() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig::default());

        let (first, reused_first) = cache.acquire(&[geometry(1, 2, 0)], 0);
        let (second, reused_second) = cache.acquire(&[geometry(1, 2, 0)], 0);
        assert_eq!(first, second);
        assert!(!reused_first);
        assert!(reused_second);

        assert_eq!(fixture.build(&mut cache).built, 1);
        assert_eq!(fixture.build(&mut cache).built, 0);
        assert_eq!(fixture.device.blas_build_count(), 1);
        assert_eq!(cache.get(first).unwrap().refs(), 2);
    }

    #[test]
    fn test_build_waits_for_residency() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        let mut cache = BlasCache::new(BlasCacheConfig::default());
        let (key, _) = cache.acquire(&[geometry(1, 2, 0)], 0);

        let report = fixture.build(&mut cache);
        assert_eq!((report.built, report.deferred), (0, 1));
        assert_eq!(cache.state(key), Some(BlasState::Unbuilt));

        fixture.make_resident(2);
        assert_eq!(fixture.build(&mut cache).built, 1);
        assert_eq!(cache.state(key), Some(BlasState::Built));
        assert_eq!(cache.stats().deferred, 1);
    }

    #[test]
    fn test_allocation_failure_defers() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig::default());
        let (key, _) = cache.acquire(&[geometry(1, 2, 0)], 0);

        fixture.device.fail_next_allocations(8);
        let report = fixture.build(&mut cache);
        assert_eq!(report.deferred, 1);
        assert_eq!(cache.state(key), Some(BlasState::Unbuilt));

        fixture.device.fail_next_allocations(0);
        assert_eq!(fixture.build(&mut cache).built, 1);
    }

    #[test]
    fn test_device_failure_is_fatal() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig::default());
        cache.acquire(&[geometry(1, 2, 0)], 0);

        fixture.device.set_failing_builds(true);
        let error = cache
            .build_pending(&fixture.buffers, &*fixture.device, &fixture.allocator)
            .unwrap_err();
        assert!(error.is_fatal());
    }

    #[test]
    fn test_buffer_write_dirties_and_rebuilds() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        fixture.make_resident(3);
        let mut cache = BlasCache::new(BlasCacheConfig::default());
        let (key, _) = cache.acquire(&[geometry(1, 2, 0)], 0);
        fixture.build(&mut cache);
        let resource = cache.get(key).unwrap().resource();

        assert_eq!(cache.mark_buffer_dirty(3), 0);
        assert_eq!(cache.mark_buffer_dirty(2), 1);
        assert_eq!(cache.state(key), Some(BlasState::Dirty));

        assert_eq!(fixture.build(&mut cache).built, 1);
        let entry = cache.get(key).unwrap();
        assert_eq!(entry.state(), BlasState::Built);
        assert_eq!(entry.builds(), 2);
        assert_eq!(entry.resource(), resource);
        assert_eq!(cache.stats().rebuilt, 1);
    }

    #[test]
    fn test_material_change_reclassifies() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig::default());
        let (key, _) = cache.acquire(&[geometry(1, 2, 9)], 0);
        fixture.build(&mut cache);
        assert_eq!(cache.get(key).unwrap().mask(), InstanceMask::OPAQUE_PUNCH);
        assert_eq!(
            cache.get(key).unwrap().instance_flags(),
            TlasInstanceFlags::FORCE_OPAQUE
        );

        fixture.buffers.transparent.insert(9);
        assert_eq!(cache.mark_material_dirty(9), 1);
        fixture.build(&mut cache);
        let entry = cache.get(key).unwrap();
        assert_eq!(entry.mask(), InstanceMask::TRANSPARENT);
        assert!(entry.instance_flags().is_empty());
    }

    #[test]
    fn test_mask_is_union_of_geometries() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig::default());

        let mut special = geometry(1, 2, 0);
        special.flags = GeometryFlags::SPECIAL.bits();
        let mut punch = geometry(1, 2, 0);
        punch.flags = GeometryFlags::PUNCH_THROUGH.bits();
        let (key, _) = cache.acquire(&[punch, special], 0);
        fixture.build(&mut cache);

        let entry = cache.get(key).unwrap();
        assert_eq!(entry.mask(), InstanceMask::OPAQUE_PUNCH | InstanceMask::SPECIAL);
        assert!(entry.instance_flags().is_empty());
        assert_eq!(fixture.device.blas_builds()[0].opaque, vec![false, false]);
    }

    #[test]
    fn test_scratch_is_worst_case_of_batch() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig::default());

        let small = geometry(1, 2, 0);
        let mut large = geometry(1, 2, 0);
        large.index_count = 3000;
        cache.acquire(&[small], 0);
        cache.acquire(&[large], 0);

        let report = fixture.build(&mut cache);
        assert_eq!(report.built, 2);
        assert_eq!(report.scratch_size, align_up(256 + 1000 * 32, 256));

        let builds = fixture.device.blas_builds();
        assert_eq!(builds[0].scratch, builds[1].scratch);
    }

    #[test]
    fn test_eviction_and_rebuild_on_draw() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig {
            eviction_frames: 3,
            ..BlasCacheConfig::default()
        });
        let (key, _) = cache.acquire(&[geometry(1, 2, 0)], 0);
        fixture.build(&mut cache);
        let live = fixture.allocator.stats().live;

        assert_eq!(cache.evict(2, &fixture.allocator), 0);
        assert_eq!(cache.evict(3, &fixture.allocator), 1);
        assert_eq!(cache.state(key), Some(BlasState::Evicted));
        assert_eq!(fixture.allocator.stats().live, live - 1);
        assert_eq!(fixture.build(&mut cache).built, 0);

        cache.touch(key, 4);
        assert_eq!(cache.state(key), Some(BlasState::Unbuilt));
        assert_eq!(fixture.build(&mut cache).built, 1);
        assert_eq!(cache.get(key).unwrap().builds(), 2);
    }

    #[test]
    fn test_unreferenced_entries_are_dropped() {
        let fixture = Fixture::new();
        let mut cache = BlasCache::new(BlasCacheConfig {
            eviction_frames: 1,
            ..BlasCacheConfig::default()
        });
        let (key, _) = cache.acquire(&[geometry(1, 2, 0)], 0);
        cache.release(key);

        cache.evict(5, &fixture.allocator);
        assert!(cache.get(key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_eviction_frames_never_evicts() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig {
            eviction_frames: 0,
            ..BlasCacheConfig::default()
        });
        let (key, _) = cache.acquire(&[geometry(1, 2, 0)], 0);
        fixture.build(&mut cache);

        assert_eq!(cache.evict(u64::MAX, &fixture.allocator), 0);
        assert_eq!(cache.state(key), Some(BlasState::Built));
    }

    #[test]
    fn test_clear_releases_storage() {
        let mut fixture = Fixture::new();
        fixture.make_resident(1);
        fixture.make_resident(2);
        let mut cache = BlasCache::new(BlasCacheConfig::default());
        cache.acquire(&[geometry(1, 2, 0)], 0);
        fixture.build(&mut cache);
        let live = fixture.allocator.stats().live;

        cache.clear(&fixture.allocator);
        assert_eq!(fixture.allocator.stats().live, live - 1);
    }
}
