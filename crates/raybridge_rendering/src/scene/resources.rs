//! Producer buffers and textures, keyed by producer identifier.

use std::collections::{HashMap, HashSet};

use raybridge_core::RawResource;
use raybridge_shared::{BufferUsage, IndexFormat};

use crate::error::{RenderError, RenderResult};

/// What a resource is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceShape {
    /// Linear buffer
    Buffer {
        /// Binding usage
        usage: BufferUsage,
        /// Index width, for index buffers
        index_format: IndexFormat,
    },
    /// 2D texture
    Texture {
        /// Width in texels
        width: u32,
        /// Height in texels
        height: u32,
        /// Mip levels
        levels: u32,
    },
}

/// A live resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceEntry {
    /// Device handle
    pub raw: RawResource,
    /// Size in bytes
    pub size: u64,
    /// Buffer or texture
    pub shape: ResourceShape,
    /// Number of writes applied
    pub writes: u64,
}

impl ResourceEntry {
    /// True for buffers.
    #[must_use]
    pub const fn is_buffer(&self) -> bool {
        matches!(self.shape, ResourceShape::Buffer { .. })
    }
}

/// Bytes needed by the first `levels` mips, or `None` when the chain is
/// longer than the dimensions allow or the size overflows.
#[must_use]
pub fn texture_size(width: u32, height: u32, levels: u32, texel_size: u32) -> Option<u64> {
    (0..levels.max(1)).try_fold(0u64, |total, level| {
        let w = u64::from(width.checked_shr(level)?.max(1));
        let h = u64::from(height.checked_shr(level)?.max(1));
        let bytes = w.checked_mul(h)?.checked_mul(u64::from(texel_size))?;
        total.checked_add(bytes)
    })
}

/// Identifier → device resource.
///
/// Identifiers whose creation failed are remembered so that later writes
/// and the release can be dropped quietly instead of reading as a
/// double free.
#[derive(Debug, Default)]
pub struct ResourceTable {
    live: HashMap<u64, ResourceEntry>,
    failed: HashSet<u64>,
}

impl ResourceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a created resource.
    ///
    /// # Errors
    ///
    /// `RenderError::DuplicateResource` if `id` is live or failed.
    pub fn insert(&mut self, id: u64, entry: ResourceEntry) -> RenderResult<()> {
        if self.contains(id) {
            return Err(RenderError::DuplicateResource(id));
        }
        self.live.insert(id, entry);
        Ok(())
    }

    /// Remembers that creating `id` failed.
    ///
    /// # Errors
    ///
    /// `RenderError::DuplicateResource` if `id` is live or failed.
    pub fn mark_failed(&mut self, id: u64) -> RenderResult<()> {
        if self.contains(id) {
            return Err(RenderError::DuplicateResource(id));
        }
        self.failed.insert(id);
        Ok(())
    }

    /// True if `id` is live or failed.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.live.contains_key(&id) || self.failed.contains(&id)
    }

    /// True if creating `id` failed.
    #[must_use]
    pub fn is_failed(&self, id: u64) -> bool {
        self.failed.contains(&id)
    }

    /// A live resource.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&ResourceEntry> {
        self.live.get(&id)
    }

    /// A live resource, mutably.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut ResourceEntry> {
        self.live.get_mut(&id)
    }

    /// Forgets `id`. Returns the entry if it was live, `None` if it had failed.
    ///
    /// # Errors
    ///
    /// `RenderError::UnknownResource` if `id` was never created or is
    /// already released.
    pub fn remove(&mut self, id: u64) -> RenderResult<Option<ResourceEntry>> {
        if let Some(entry) = self.live.remove(&id) {
            return Ok(Some(entry));
        }
        if self.failed.remove(&id) {
            return Ok(None);
        }
        Err(RenderError::UnknownResource(id))
    }

    /// Live resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True if nothing is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Removes every live entry.
    pub fn drain(&mut self) -> impl Iterator<Item = (u64, ResourceEntry)> + '_ {
        self.failed.clear();
        self.live.drain()
    }
}
