//! # Scene Tables
//!
//! Consumer-side state rebuilt from records. Every cross-boundary object is
//! an entry in one of these tables, addressed by the producer's identifier.
//!
//! ```text
//! CreateBuffer/Texture ──► ResourceTable   id → RawResource
//! CreateMaterial       ──► MaterialTable   id → classification
//! CreateMesh           ──► MeshTable       (mesh, element) → geometry + BlasKey
//! DrawInstance         ──► InstanceTable   this frame, submission order
//! ```

mod instances;
mod materials;
mod meshes;
mod resources;

pub use instances::{InstanceKey, InstanceRecord, InstanceTable};
pub use materials::{Material, MaterialTable};
pub use meshes::{MeshEntry, MeshKey, MeshTable};
pub use resources::{texture_size, ResourceEntry, ResourceShape, ResourceTable};

use raybridge_shared::{GeometryDesc, GeometryFlags};

/// All consumer-side tables.
#[derive(Debug, Default)]
pub struct Scene {
    /// Buffers and textures
    pub resources: ResourceTable,
    /// Materials
    pub materials: MaterialTable,
    /// Mesh elements
    pub meshes: MeshTable,
    /// This frame's draws
    pub instances: InstanceTable,
}

impl Scene {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometry flags merged with the classification of its material.
    #[must_use]
    pub fn effective_flags(&self, desc: &GeometryDesc) -> GeometryFlags {
        desc.geometry_flags() | self.materials.geometry_flags(desc.material)
    }
}
