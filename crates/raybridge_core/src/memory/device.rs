//! The seam between the allocator and the graphics driver.

use crate::error::AllocResult;

/// Raw device resource handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawResource(pub u64);

/// Raw device heap handle. One heap backs one sub-allocator block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHeap(pub u64);

/// What a resource will be used as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Vertex, index or constant buffer
    Buffer,
    /// Sampled texture
    Texture,
    /// Bottom- or top-level acceleration structure storage
    AccelerationStructure,
    /// Acceleration structure build scratch
    Scratch,
    /// Top-level instance descriptors
    InstanceDescs,
}

/// Size and placement requirements of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    /// Usage
    pub kind: ResourceKind,
    /// Bytes
    pub size: u64,
    /// Required placement alignment, a power of two
    pub alignment: u64,
}

impl ResourceDesc {
    /// Placement alignment of textures.
    pub const TEXTURE_ALIGNMENT: u64 = 64 * 1024;

    /// Acceleration structures must start on 256 bytes.
    pub const ACCEL_ALIGNMENT: u64 = 256;

    /// A plain buffer.
    #[must_use]
    pub const fn buffer(size: u64) -> Self {
        Self {
            kind: ResourceKind::Buffer,
            size,
            alignment: 16,
        }
    }

    /// A texture of `size` bytes.
    #[must_use]
    pub const fn texture(size: u64) -> Self {
        Self {
            kind: ResourceKind::Texture,
            size,
            alignment: Self::TEXTURE_ALIGNMENT,
        }
    }

    /// Acceleration structure storage.
    #[must_use]
    pub const fn acceleration_structure(size: u64) -> Self {
        Self {
            kind: ResourceKind::AccelerationStructure,
            size,
            alignment: Self::ACCEL_ALIGNMENT,
        }
    }

    /// Build scratch.
    #[must_use]
    pub const fn scratch(size: u64) -> Self {
        Self {
            kind: ResourceKind::Scratch,
            size,
            alignment: Self::ACCEL_ALIGNMENT,
        }
    }

    /// Top-level instance descriptor buffer.
    #[must_use]
    pub const fn instance_descs(size: u64) -> Self {
        Self {
            kind: ResourceKind::InstanceDescs,
            size,
            alignment: 16,
        }
    }
}

/// Device memory entry points the allocator drives.
///
/// Implementations are called from the render thread and must not call
/// back into the allocator.
pub trait GpuMemory: Send + Sync {
    /// Reserves a heap of `size` bytes.
    ///
    /// # Errors
    ///
    /// `AllocError::OutOfMemory` when the device has no room.
    fn create_heap(&self, size: u64) -> AllocResult<DeviceHeap>;

    /// Releases a heap. Every resource placed in it is already destroyed.
    fn destroy_heap(&self, heap: DeviceHeap);

    /// Creates a resource with its own memory.
    ///
    /// # Errors
    ///
    /// `AllocError::OutOfMemory` when the device has no room.
    fn create_committed(&self, desc: &ResourceDesc) -> AllocResult<RawResource>;

    /// Creates a resource at `offset` inside `heap`.
    ///
    /// # Errors
    ///
    /// Any device failure.
    fn create_placed(
        &self,
        heap: DeviceHeap,
        offset: u64,
        desc: &ResourceDesc,
    ) -> AllocResult<RawResource>;

    /// Destroys a resource created by either path.
    fn destroy_resource(&self, resource: RawResource);
}

impl std::fmt::Debug for dyn GpuMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GpuMemory")
    }
}
