//! Mesh elements and the geometry they reference.

use std::collections::HashMap;
use std::fmt;

use raybridge_shared::GeometryDesc;

use crate::accel::BlasKey;

/// A mesh element as named by the producer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshKey {
    /// Mesh identifier
    pub mesh: u64,
    /// Element within the mesh
    pub element: u32,
}

impl MeshKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(mesh: u64, element: u32) -> Self {
        Self { mesh, element }
    }
}

impl fmt::Display for MeshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mesh, self.element)
    }
}

/// A mesh element's geometry and its bottom-level cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshEntry {
    /// Geometry descriptors as sent
    pub geometries: Vec<GeometryDesc>,
    /// Cache entry built from `geometries`
    pub blas: BlasKey,
}

/// Mesh element → geometry.
#[derive(Debug, Default)]
pub struct MeshTable {
    meshes: HashMap<MeshKey, MeshEntry>,
}

impl MeshTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces an element; returns the replaced entry.
    pub fn insert(&mut self, key: MeshKey, entry: MeshEntry) -> Option<MeshEntry> {
        self.meshes.insert(key, entry)
    }

    /// Drops an element.
    pub fn remove(&mut self, key: MeshKey) -> Option<MeshEntry> {
        self.meshes.remove(&key)
    }

    /// An element.
    #[must_use]
    pub fn get(&self, key: MeshKey) -> Option<&MeshEntry> {
        self.meshes.get(&key)
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// True if there are none.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Every element.
    pub fn iter(&self) -> impl Iterator<Item = (&MeshKey, &MeshEntry)> {
        self.meshes.iter()
    }
}
