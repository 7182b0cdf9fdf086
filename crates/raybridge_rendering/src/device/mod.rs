//! # Ray-Tracing Device
//!
//! The seam between the frame pipeline and the graphics driver.
//!
//! ```text
//! RenderBridge ──► GpuAllocator ──► GpuMemory ─┐
//!      │                                        ├─► RaytracingDevice (driver)
//!      └──► BLAS / TLAS builds, render, present ┘
//! ```
//!
//! Everything above the trait is driver-agnostic. `HeadlessDevice` runs the
//! whole pipeline on the CPU.

mod headless;

pub use headless::{BlasBuild, HeadlessDevice, RenderedFrame, TlasBuild};

use std::fmt;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use raybridge_core::{GpuMemory, RawResource};
use raybridge_shared::{GeometryDesc, Transform};

use crate::error::{RenderError, RenderResult};

/// A `major.minor` capability level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureLevel {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

impl FeatureLevel {
    /// Creates a level.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Minimum ray-tracing tier (inline ray queries).
pub const MIN_RAYTRACING_TIER: FeatureLevel = FeatureLevel::new(1, 1);

/// Minimum shader model.
pub const MIN_SHADER_MODEL: FeatureLevel = FeatureLevel::new(6, 5);

/// Minimum resource-binding tier (fully bindless).
pub const MIN_RESOURCE_BINDING_TIER: u32 = 3;

/// What the device reports about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Adapter description
    pub adapter: String,
    /// Ray-tracing tier
    pub raytracing_tier: FeatureLevel,
    /// Highest supported shader model
    pub shader_model: FeatureLevel,
    /// Resource-binding tier
    pub resource_binding_tier: u32,
}

impl Capabilities {
    /// Checks every minimum.
    ///
    /// # Errors
    ///
    /// `RenderError::Unsupported` naming the first capability below its minimum.
    pub fn check(&self) -> RenderResult<()> {
        if self.raytracing_tier < MIN_RAYTRACING_TIER {
            return Err(RenderError::Unsupported {
                feature: "ray-tracing tier",
                found: self.raytracing_tier.to_string(),
                required: MIN_RAYTRACING_TIER.to_string(),
            });
        }
        if self.shader_model < MIN_SHADER_MODEL {
            return Err(RenderError::Unsupported {
                feature: "shader model",
                found: self.shader_model.to_string(),
                required: MIN_SHADER_MODEL.to_string(),
            });
        }
        if self.resource_binding_tier < MIN_RESOURCE_BINDING_TIER {
            return Err(RenderError::Unsupported {
                feature: "resource-binding tier",
                found: self.resource_binding_tier.to_string(),
                required: MIN_RESOURCE_BINDING_TIER.to_string(),
            });
        }
        Ok(())
    }
}

/// One geometry of a bottom-level build, with buffers resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlasGeometry {
    /// Index buffer
    pub index_buffer: RawResource,
    /// Vertex buffer
    pub vertex_buffer: RawResource,
    /// Layout and ranges as sent by the producer
    pub desc: GeometryDesc,
    /// Skip any-hit processing
    pub opaque: bool,
}

/// Memory a build needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrebuildInfo {
    /// Result storage in bytes
    pub result_size: u64,
    /// Scratch in bytes
    pub scratch_size: u64,
}

bitflags! {
    /// Per-instance traversal flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TlasInstanceFlags: u8 {
        /// Both faces are hit
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        /// Front faces are clockwise
        const TRIANGLE_FRONT_CCW = 1 << 1;
        /// Every geometry is treated as opaque
        const FORCE_OPAQUE = 1 << 2;
        /// Every geometry runs any-hit
        const FORCE_NON_OPAQUE = 1 << 3;
    }
}

/// Instance ids have 24 bits; a top-level structure holds at most this
/// many instances.
pub const MAX_TLAS_INSTANCES: u32 = 1 << 24;

/// Top-level instance descriptor, in the driver's layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TlasInstance {
    /// Object-to-world transform
    pub transform: Transform,
    /// Instance id (low 24 bits) and mask (high 8 bits)
    pub id_and_mask: u32,
    /// Hit-group offset (low 24 bits) and flags (high 8 bits)
    pub contribution_and_flags: u32,
    /// Device address of the bottom-level structure
    pub blas_address: u64,
}

impl TlasInstance {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Packs an instance.
    #[must_use]
    pub const fn new(
        transform: Transform,
        instance_id: u32,
        mask: u8,
        flags: TlasInstanceFlags,
        blas_address: u64,
    ) -> Self {
        Self {
            transform,
            id_and_mask: (instance_id & 0x00FF_FFFF) | ((mask as u32) << 24),
            contribution_and_flags: (flags.bits() as u32) << 24,
            blas_address,
        }
    }

    /// Instance id.
    #[inline]
    #[must_use]
    pub const fn instance_id(&self) -> u32 {
        self.id_and_mask & 0x00FF_FFFF
    }

    /// Visibility mask.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // top byte
    pub const fn mask(&self) -> u8 {
        (self.id_and_mask >> 24) as u8
    }

    /// Traversal flags.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // top byte
    pub const fn flags(&self) -> TlasInstanceFlags {
        TlasInstanceFlags::from_bits_truncate((self.contribution_and_flags >> 24) as u8)
    }
}

/// Everything the device needs to trace one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameInputs<'a> {
    /// Producer frame number
    pub frame: u64,
    /// Top-level structure of this frame
    pub tlas: RawResource,
    /// Instances in `tlas`
    pub instance_count: u32,
    /// Last frame's transform of each instance, in `tlas` order
    pub previous_transforms: &'a [Transform],
    /// Frame constants buffer
    pub frame_constants: RawResource,
    /// Drop temporal history
    pub reset_accumulation: bool,
}

/// A GPU that can build acceleration structures and trace them.
///
/// Called from the render thread, except `write_resource`, which the upload
/// worker also calls.
pub trait RaytracingDevice: GpuMemory {
    /// What the device supports.
    fn capabilities(&self) -> Capabilities;

    /// Copies `data` into `resource` at `offset`.
    ///
    /// # Errors
    ///
    /// `RenderError::Device` on driver failure.
    fn write_resource(&self, resource: RawResource, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Sizes a bottom-level build.
    fn blas_prebuild_info(&self, geometries: &[BlasGeometry]) -> PrebuildInfo;

    /// Builds a bottom-level structure into `destination`.
    ///
    /// # Errors
    ///
    /// `RenderError::Device` on driver failure.
    fn build_blas(
        &self,
        geometries: &[BlasGeometry],
        destination: RawResource,
        scratch: RawResource,
    ) -> RenderResult<()>;

    /// Sizes a top-level build.
    fn tlas_prebuild_info(&self, instance_count: u32) -> PrebuildInfo;

    /// Builds a top-level structure from `instance_count` descriptors in `instances`.
    ///
    /// # Errors
    ///
    /// `RenderError::Device` on driver failure.
    fn build_tlas(
        &self,
        instances: RawResource,
        instance_count: u32,
        destination: RawResource,
        scratch: RawResource,
    ) -> RenderResult<()>;

    /// Device address of an acceleration structure.
    fn blas_address(&self, resource: RawResource) -> u64;

    /// Traces and composites one frame.
    ///
    /// # Errors
    ///
    /// `RenderError::Device` on driver failure.
    fn render(&self, inputs: &FrameInputs<'_>) -> RenderResult<()>;

    /// Shows the last rendered frame.
    ///
    /// # Errors
    ///
    /// `RenderError::Device` on driver failure.
    fn present(&self) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable() -> Capabilities {
        Capabilities {
            adapter: "test".into(),
            raytracing_tier: FeatureLevel::new(1, 1),
            shader_model: FeatureLevel::new(6, 6),
            resource_binding_tier: 3,
        }
    }

    #[test]
    fn test_capability_minimums() {
        assert!(capable().check().is_ok());

        let old_tier = Capabilities {
            raytracing_tier: FeatureLevel::new(1, 0),
            ..capable()
        };
        assert!(matches!(
            old_tier.check(),
            Err(RenderError::Unsupported { feature: "ray-tracing tier", .. })
        ));

        let old_shaders = Capabilities {
            shader_model: FeatureLevel::new(6, 4),
            ..capable()
        };
        assert!(matches!(
            old_shaders.check(),
            Err(RenderError::Unsupported { feature: "shader model", .. })
        ));

        let bound = Capabilities {
            resource_binding_tier: 2,
            ..capable()
        };
        assert!(bound.check().unwrap_err().is_fatal());
    }

    #[test]
    fn test_feature_level_order() {
        assert!(FeatureLevel::new(6, 10) > FeatureLevel::new(6, 5));
        assert!(FeatureLevel::new(7, 0) > FeatureLevel::new(6, 10));
        assert_eq!(FeatureLevel::new(6, 5).to_string(), "6.5");
    }

    #[test]
    fn test_instance_packing() {
        assert_eq!(TlasInstance::SIZE, 64);

        let instance = TlasInstance::new(
            raybridge_shared::IDENTITY_TRANSFORM,
            0x0123_4567,
            0b101,
            TlasInstanceFlags::FORCE_OPAQUE,
            0xABCD,
        );
        assert_eq!(instance.instance_id(), 0x23_4567);
        assert_eq!(instance.mask(), 0b101);
        assert_eq!(instance.flags(), TlasInstanceFlags::FORCE_OPAQUE);
        assert_eq!(instance.blas_address, 0xABCD);
    }
}
