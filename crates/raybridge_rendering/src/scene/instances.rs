//! Per-frame instances and their transform history.
//!
//! The producer only sends this frame's transform. An instance is matched
//! to last frame's by mesh element and draw order within that element:
//!
//! ```text
//! frame k:    draw(A, T0)  draw(B, U0)  draw(A, T1)
//!             (A,0)        (B,0)        (A,1)
//! frame k+1:  draw(A, T2)  draw(A, T3)
//!             (A,0) prev=T0             (A,1) prev=T1
//! ```

use std::collections::HashMap;

use raybridge_shared::Transform;

use super::meshes::MeshKey;
use crate::accel::BlasKey;

/// Identity of an instance across frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    /// Mesh element drawn
    pub mesh: MeshKey,
    /// Draws of the same element earlier in the frame
    pub occurrence: u32,
}

/// One draw of this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InstanceRecord {
    /// Cross-frame identity
    pub key: InstanceKey,
    /// Bottom-level cache entry
    pub blas: BlasKey,
    /// This frame's transform
    pub transform: Transform,
    /// Last frame's transform, or `transform` for a new instance
    pub previous_transform: Transform,
}

/// This frame's instances in submission order.
#[derive(Debug, Default)]
pub struct InstanceTable {
    current: Vec<InstanceRecord>,
    occurrences: HashMap<MeshKey, u32>,
    history: HashMap<InstanceKey, Transform>,
    last_frame: Vec<InstanceRecord>,
}

impl InstanceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a draw.
    pub fn push(&mut self, mesh: MeshKey, blas: BlasKey, transform: Transform) -> &InstanceRecord {
        let occurrence = self.occurrences.entry(mesh).or_insert(0);
        let key = InstanceKey {
            mesh,
            occurrence: *occurrence,
        };
        *occurrence += 1;

        let previous_transform = self.history.get(&key).copied().unwrap_or(transform);
        self.current.push(InstanceRecord {
            key,
            blas,
            transform,
            previous_transform,
        });
        &self.current[self.current.len() - 1]
    }

    /// This frame's draws so far.
    #[must_use]
    pub fn current(&self) -> &[InstanceRecord] {
        &self.current
    }

    /// The draws of the last finished frame.
    #[must_use]
    pub fn last_frame(&self) -> &[InstanceRecord] {
        &self.last_frame
    }

    /// Drops the history of a released mesh element.
    pub fn forget_mesh(&mut self, mesh: MeshKey) {
        self.history.retain(|key, _| key.mesh != mesh);
    }

    /// Closes the frame: this frame's transforms become next frame's history.
    pub fn end_frame(&mut self) {
        self.history.clear();
        self.history
            .extend(self.current.iter().map(|r| (r.key, r.transform)));
        self.occurrences.clear();
        self.last_frame.clear();
        self.last_frame.append(&mut self.current);
    }
}
