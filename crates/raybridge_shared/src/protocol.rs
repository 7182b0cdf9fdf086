//! Channel Record payloads.
//!
//! These types are copied byte-for-byte into the shared channel.
//! Both processes must agree on these definitions, so every struct is
//! `#[repr(C)]`, fixed-width and free of implicit padding.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::constants::{
    ATTRIBUTE_ABSENT, MAX_MATERIAL_PARAMETERS, MAX_MATERIAL_TEXTURES, MAX_TEXCOORD_SETS,
    UNASSIGNED_ID,
};
use crate::error::{ProtocolError, ProtocolResult};

/// Row-major 3x4 affine transform (the last column is translation).
pub type Transform = [[f32; 4]; 3];

/// The identity transform.
pub const IDENTITY_TRANSFORM: Transform = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

/// Record type identifier
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordTag {
    /// Create a vertex/index/constant buffer
    CreateBuffer = 1,
    /// Create a texture
    CreateTexture = 2,
    /// Upload bytes into a buffer or texture
    WriteResource = 3,
    /// Destroy a buffer or texture
    ReleaseResource = 4,
    /// Create or replace a material
    CreateMaterial = 5,
    /// Create or replace a mesh element (one or more geometry descriptors)
    CreateMesh = 6,
    /// Drop a mesh element
    ReleaseMesh = 7,
    /// Draw one instance of a mesh element this frame
    DrawInstance = 8,
    /// Terminal marker of a frame
    FrameEnd = 9,
}

impl RecordTag {
    /// Converts from the raw wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::CreateBuffer),
            2 => Some(Self::CreateTexture),
            3 => Some(Self::WriteResource),
            4 => Some(Self::ReleaseResource),
            5 => Some(Self::CreateMaterial),
            6 => Some(Self::CreateMesh),
            7 => Some(Self::ReleaseMesh),
            8 => Some(Self::DrawInstance),
            9 => Some(Self::FrameEnd),
            _ => None,
        }
    }
}

/// Header in front of every record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RecordHeader {
    /// `RecordTag` as u32
    pub tag: u32,
    /// Payload length in bytes, excluding header and padding
    pub payload_len: u32,
    /// Position of the record within its chunk, starting at 0
    pub sequence: u32,
    /// Must be zero
    pub reserved: u32,
}

/// A fixed-size payload with a known tag.
pub trait RecordPayload: Pod {
    /// Tag written in front of this payload.
    const TAG: RecordTag;
}

bitflags! {
    /// How a buffer will be bound.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Vertex data
        const VERTEX = 1 << 0;
        /// Index data
        const INDEX = 1 << 1;
        /// Shader constants
        const CONSTANT = 1 << 2;
    }
}

bitflags! {
    /// Per-geometry classification used for ray-traversal culling.
    ///
    /// A geometry with none of these bits is opaque.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct GeometryFlags: u32 {
        /// Alpha blended
        const TRANSPARENT = 1 << 0;
        /// Alpha tested
        const PUNCH_THROUGH = 1 << 1;
        /// Sky, water and other special-cased surfaces
        const SPECIAL = 1 << 2;
    }
}

bitflags! {
    /// Material classification bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MaterialFlags: u32 {
        /// Alpha blended
        const TRANSPARENT = 1 << 0;
        /// Alpha tested
        const PUNCH_THROUGH = 1 << 1;
        /// Special-cased shader (sky, water)
        const SPECIAL = 1 << 2;
        /// Back faces are not culled
        const DOUBLE_SIDED = 1 << 3;
    }
}

/// Index element width of an index buffer.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// Not an index buffer
    #[default]
    None = 0,
    /// 16-bit indices
    U16 = 1,
    /// 32-bit indices
    U32 = 2,
}

impl IndexFormat {
    /// Converts from the raw wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::U16),
            2 => Some(Self::U32),
            _ => None,
        }
    }
}

/// Create a GPU buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateBuffer {
    /// Resource identifier
    pub id: u64,
    /// Size in bytes
    pub byte_size: u64,
    /// `BufferUsage` bits
    pub usage: u32,
    /// `IndexFormat` as u32
    pub index_format: u32,
}

impl RecordPayload for CreateBuffer {
    const TAG: RecordTag = RecordTag::CreateBuffer;
}

/// Create a 2D texture.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateTexture {
    /// Resource identifier
    pub id: u64,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Mip levels
    pub levels: u32,
    /// Bytes per texel of the base level
    pub texel_size: u32,
}

impl RecordPayload for CreateTexture {
    const TAG: RecordTag = RecordTag::CreateTexture;
}

impl CreateTexture {
    /// Length of the full mip chain down to 1x1.
    #[inline]
    #[must_use]
    pub const fn max_levels(&self) -> u32 {
        let largest = if self.width > self.height {
            self.width
        } else {
            self.height
        };
        u32::BITS - largest.leading_zeros()
    }

    /// Checks identifier, dimensions and mip count. `levels == 0` means
    /// a single level.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidTexture` naming the first violation.
    pub fn validate(&self) -> ProtocolResult<()> {
        let reason = if self.id == UNASSIGNED_ID {
            "unassigned identifier"
        } else if self.width == 0 || self.height == 0 {
            "zero dimension"
        } else if self.texel_size == 0 {
            "zero texel size"
        } else if self.levels > self.max_levels() {
            "more mip levels than the dimensions allow"
        } else {
            return Ok(());
        };
        Err(ProtocolError::InvalidTexture {
            id: self.id,
            reason,
        })
    }
}

/// Upload header; `data_len` bytes follow.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WriteResource {
    /// Resource identifier
    pub id: u64,
    /// Destination offset in bytes
    pub offset: u64,
    /// Number of trailing data bytes
    pub data_len: u64,
}

impl RecordPayload for WriteResource {
    const TAG: RecordTag = RecordTag::WriteResource;
}

/// Destroy a buffer or texture.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReleaseResource {
    /// Resource identifier
    pub id: u64,
}

impl RecordPayload for ReleaseResource {
    const TAG: RecordTag = RecordTag::ReleaseResource;
}

/// Create or replace a material.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CreateMaterial {
    /// Material identifier
    pub id: u64,
    /// `MaterialFlags` bits
    pub flags: u32,
    /// Number of used entries in `textures`
    pub texture_count: u32,
    /// Texture resource identifiers, `0` for empty slots
    pub textures: [u64; MAX_MATERIAL_TEXTURES],
    /// Shader parameters
    pub parameters: [[f32; 4]; MAX_MATERIAL_PARAMETERS],
}

impl Default for CreateMaterial {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl RecordPayload for CreateMaterial {
    const TAG: RecordTag = RecordTag::CreateMaterial;
}

/// Create or replace a mesh element; `geometry_count` descriptors follow.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateMesh {
    /// Mesh identifier
    pub mesh: u64,
    /// Element (sub-mesh) identifier within the mesh
    pub element: u32,
    /// Number of trailing `GeometryDesc`
    pub geometry_count: u32,
}

impl RecordPayload for CreateMesh {
    const TAG: RecordTag = RecordTag::CreateMesh;
}

/// One triangle geometry of a mesh element.
///
/// Attribute offsets are byte offsets into one vertex; `ATTRIBUTE_ABSENT`
/// marks a missing attribute.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct GeometryDesc {
    /// Index buffer resource identifier
    pub index_buffer: u64,
    /// Vertex buffer resource identifier
    pub vertex_buffer: u64,
    /// Material identifier
    pub material: u64,
    /// First index, in bytes from the start of the index buffer
    pub index_offset: u32,
    /// Number of indices (a multiple of 3)
    pub index_count: u32,
    /// First vertex, in bytes from the start of the vertex buffer
    pub vertex_offset: u32,
    /// Number of vertices
    pub vertex_count: u32,
    /// Bytes per vertex
    pub vertex_stride: u32,
    /// `GeometryFlags` bits
    pub flags: u32,
    /// Position (float3)
    pub position_offset: u16,
    /// Normal
    pub normal_offset: u16,
    /// Tangent
    pub tangent_offset: u16,
    /// Binormal
    pub binormal_offset: u16,
    /// Vertex color
    pub color_offset: u16,
    /// Texcoord sets
    pub texcoord_offsets: [u16; MAX_TEXCOORD_SETS],
    /// Must be zero
    pub reserved0: u16,
    /// Must be zero
    pub reserved1: u32,
}

impl Default for GeometryDesc {
    fn default() -> Self {
        Self {
            index_buffer: 0,
            vertex_buffer: 0,
            material: 0,
            index_offset: 0,
            index_count: 0,
            vertex_offset: 0,
            vertex_count: 0,
            vertex_stride: 0,
            flags: 0,
            position_offset: 0,
            normal_offset: ATTRIBUTE_ABSENT,
            tangent_offset: ATTRIBUTE_ABSENT,
            binormal_offset: ATTRIBUTE_ABSENT,
            color_offset: ATTRIBUTE_ABSENT,
            texcoord_offsets: [ATTRIBUTE_ABSENT; MAX_TEXCOORD_SETS],
            reserved0: 0,
            reserved1: 0,
        }
    }
}

impl GeometryDesc {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Returns the geometry classification.
    #[inline]
    #[must_use]
    pub const fn geometry_flags(&self) -> GeometryFlags {
        GeometryFlags::from_bits_truncate(self.flags)
    }

    /// Returns true if the geometry needs no any-hit processing.
    #[inline]
    #[must_use]
    pub const fn is_opaque(&self) -> bool {
        self.geometry_flags().is_empty()
    }

    /// Number of triangles.
    #[inline]
    #[must_use]
    pub const fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    /// Checks that every present attribute lies within the stride.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidGeometry` naming the first violation.
    pub fn validate(&self) -> ProtocolResult<()> {
        let stride = self.vertex_stride;

        if stride == 0 {
            return Err(ProtocolError::InvalidGeometry("vertex stride is zero"));
        }
        if self.index_buffer == 0 || self.vertex_buffer == 0 {
            return Err(ProtocolError::InvalidGeometry("unassigned buffer identifier"));
        }
        if self.index_count == 0 || self.index_count % 3 != 0 {
            return Err(ProtocolError::InvalidGeometry("index count is not a positive multiple of 3"));
        }
        if self.position_offset == ATTRIBUTE_ABSENT || u32::from(self.position_offset) + 12 > stride {
            return Err(ProtocolError::InvalidGeometry("position does not fit in the stride"));
        }

        let optional = [
            self.normal_offset,
            self.tangent_offset,
            self.binormal_offset,
            self.color_offset,
            self.texcoord_offsets[0],
            self.texcoord_offsets[1],
            self.texcoord_offsets[2],
            self.texcoord_offsets[3],
        ];
        if optional
            .iter()
            .any(|&offset| offset != ATTRIBUTE_ABSENT && u32::from(offset) >= stride)
        {
            return Err(ProtocolError::InvalidGeometry("attribute offset outside the stride"));
        }

        Ok(())
    }
}

/// Drop a mesh element.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReleaseMesh {
    /// Mesh identifier
    pub mesh: u64,
    /// Element identifier
    pub element: u32,
    /// Must be zero
    pub reserved: u32,
}

impl RecordPayload for ReleaseMesh {
    const TAG: RecordTag = RecordTag::ReleaseMesh;
}

/// Draw one instance of a mesh element this frame.
///
/// The previous transform is not sent; the consumer keeps the history.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawInstance {
    /// World transform for this frame
    pub transform: Transform,
    /// Mesh identifier
    pub mesh: u64,
    /// Element identifier
    pub element: u32,
    /// Must be zero
    pub reserved: u32,
}

impl Default for DrawInstance {
    fn default() -> Self {
        Self {
            transform: IDENTITY_TRANSFORM,
            mesh: 0,
            element: 0,
            reserved: 0,
        }
    }
}

impl RecordPayload for DrawInstance {
    const TAG: RecordTag = RecordTag::DrawInstance;
}

/// Terminal marker of a frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FrameEnd {
    /// Producer frame number, strictly increasing
    pub frame: u64,
    /// Non-zero after a camera cut
    pub reset_accumulation: u32,
    /// Must be zero
    pub reserved: u32,
}

impl RecordPayload for FrameEnd {
    const TAG: RecordTag = RecordTag::FrameEnd;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_geometry() -> GeometryDesc {
        GeometryDesc {
            index_buffer: 1,
            vertex_buffer: 2,
            index_count: 6,
            vertex_count: 4,
            vertex_stride: 32,
            normal_offset: 12,
            texcoord_offsets: [24, ATTRIBUTE_ABSENT, ATTRIBUTE_ABSENT, ATTRIBUTE_ABSENT],
            ..GeometryDesc::default()
        }
    }

    #[test]
    fn test_wire_sizes() {
        // Fixed sizes, identical on 32-bit and 64-bit builds
        assert_eq!(std::mem::size_of::<RecordHeader>(), 16);
        assert_eq!(std::mem::size_of::<CreateBuffer>(), 24);
        assert_eq!(std::mem::size_of::<CreateTexture>(), 24);
        assert_eq!(std::mem::size_of::<WriteResource>(), 24);
        assert_eq!(std::mem::size_of::<CreateMaterial>(), 400);
        assert_eq!(std::mem::size_of::<CreateMesh>(), 16);
        assert_eq!(GeometryDesc::SIZE, 72);
        assert_eq!(std::mem::size_of::<DrawInstance>(), 64);
        assert_eq!(std::mem::size_of::<FrameEnd>(), 16);
    }

    #[test]
    fn test_tag_from_u32() {
        assert_eq!(RecordTag::from_u32(8), Some(RecordTag::DrawInstance));
        assert_eq!(RecordTag::from_u32(0), None);
        assert_eq!(RecordTag::from_u32(10), None);
    }

    #[test]
    fn test_geometry_validation() {
        assert!(valid_geometry().validate().is_ok());

        let mut geometry = valid_geometry();
        geometry.position_offset = 24;
        assert!(geometry.validate().is_err()); // 24 + 12 > 32

        let mut geometry = valid_geometry();
        geometry.color_offset = 32;
        assert!(geometry.validate().is_err());

        let mut geometry = valid_geometry();
        geometry.index_count = 5;
        assert!(geometry.validate().is_err());

        let mut geometry = valid_geometry();
        geometry.vertex_buffer = 0;
        assert!(geometry.validate().is_err());
    }

    #[test]
    fn test_texture_validation() {
        let texture = CreateTexture {
            id: 7,
            width: 4,
            height: 4,
            levels: 3,
            texel_size: 4,
        };
        assert_eq!(texture.max_levels(), 3);
        assert!(texture.validate().is_ok());
        assert!(CreateTexture { levels: 0, ..texture }.validate().is_ok());
        assert_eq!(CreateTexture { width: 1, height: 1, ..texture }.max_levels(), 1);
        assert_eq!(CreateTexture { width: 1024, height: 3, ..texture }.max_levels(), 11);

        for bad in [
            CreateTexture { id: UNASSIGNED_ID, ..texture },
            CreateTexture { width: 0, ..texture },
            CreateTexture { height: 0, ..texture },
            CreateTexture { texel_size: 0, ..texture },
            CreateTexture { levels: 4, ..texture },
            CreateTexture { levels: 40, ..texture },
            CreateTexture { levels: u32::MAX, ..texture },
        ] {
            assert!(
                matches!(bad.validate(), Err(ProtocolError::InvalidTexture { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_geometry_classification() {
        let mut geometry = valid_geometry();
        assert!(geometry.is_opaque());

        geometry.flags = GeometryFlags::PUNCH_THROUGH.bits();
        assert!(!geometry.is_opaque());
        assert_eq!(geometry.triangle_count(), 2);
    }
}
