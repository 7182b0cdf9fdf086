//! Materials and their classification.

use std::collections::HashMap;

use raybridge_shared::constants::MAX_MATERIAL_PARAMETERS;
use raybridge_shared::{CreateMaterial, GeometryFlags, MaterialFlags};

/// A material as last sent by the producer.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    /// Classification
    pub flags: MaterialFlags,
    /// Texture identifiers in slot order
    pub textures: Vec<u64>,
    /// Shader parameters
    pub parameters: [[f32; 4]; MAX_MATERIAL_PARAMETERS],
}

impl Material {
    /// Builds a material from its record.
    #[must_use]
    pub fn from_record(record: &CreateMaterial) -> Self {
        let count = (record.texture_count as usize).min(record.textures.len());
        Self {
            flags: MaterialFlags::from_bits_truncate(record.flags),
            textures: record.textures[..count].to_vec(),
            parameters: record.parameters,
        }
    }

    /// Geometry classification implied by the material.
    #[must_use]
    pub fn geometry_flags(&self) -> GeometryFlags {
        let mut flags = GeometryFlags::empty();
        flags.set(
            GeometryFlags::TRANSPARENT,
            self.flags.contains(MaterialFlags::TRANSPARENT),
        );
        flags.set(
            GeometryFlags::PUNCH_THROUGH,
            self.flags.contains(MaterialFlags::PUNCH_THROUGH),
        );
        flags.set(
            GeometryFlags::SPECIAL,
            self.flags.contains(MaterialFlags::SPECIAL),
        );
        flags
    }
}

/// Material identifier → material.
#[derive(Debug, Default)]
pub struct MaterialTable {
    materials: HashMap<u64, Material>,
}

impl MaterialTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a material.
    ///
    /// Returns true if a previous version had a different classification.
    pub fn insert(&mut self, id: u64, material: Material) -> bool {
        let classification = material.geometry_flags();
        self.materials
            .insert(id, material)
            .is_some_and(|previous| previous.geometry_flags() != classification)
    }

    /// A material.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&Material> {
        self.materials.get(&id)
    }

    /// Classification of `id`; unknown materials classify as opaque.
    #[must_use]
    pub fn geometry_flags(&self, id: u64) -> GeometryFlags {
        self.materials
            .get(&id)
            .map_or(GeometryFlags::empty(), Material::geometry_flags)
    }

    /// Number of materials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// True if there are none.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(flags: MaterialFlags) -> CreateMaterial {
        let mut record = CreateMaterial {
            id: 1,
            flags: flags.bits(),
            texture_count: 2,
            ..CreateMaterial::default()
        };
        record.textures[0] = 10;
        record.textures[1] = 11;
        record.textures[2] = 99;
        record
    }

    #[test]
    fn test_from_record_uses_texture_count() {
        let material = Material::from_record(&record(MaterialFlags::DOUBLE_SIDED));
        assert_eq!(material.textures, vec![10, 11]);
        assert!(material.geometry_flags().is_empty());
    }

    #[test]
    fn test_classification_change_is_reported() {
        let mut table = MaterialTable::new();
        assert!(!table.insert(1, Material::from_record(&record(MaterialFlags::empty()))));
        assert!(!table.insert(1, Material::from_record(&record(MaterialFlags::DOUBLE_SIDED))));
        assert!(table.insert(1, Material::from_record(&record(MaterialFlags::TRANSPARENT))));
        assert_eq!(table.geometry_flags(1), GeometryFlags::TRANSPARENT);
    }

    #[test]
    fn test_unknown_material_is_opaque() {
        let table = MaterialTable::new();
        assert!(table.geometry_flags(42).is_empty());
    }
}
