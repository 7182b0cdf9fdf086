//! # Acceleration Structures
//!
//! Bottom-level structures are cached by geometry content and survive
//! across frames. The top-level structure is rebuilt every frame from the
//! frame's draws, in the order they were submitted.
//!
//! ## Per-frame order
//!
//! 1. `BlasCache::evict` - release storage of long-undrawn entries
//! 2. `BlasCache::build_pending` - build what is new or dirty and resident
//! 3. `TopLevelBuilder::build` - one instance per draw with a built entry

mod bottom_level;
mod top_level;

pub use bottom_level::{
    BlasCache, BlasCacheConfig, BlasCacheStats, BlasEntry, BlasKey, BlasState, BuildReport,
    GeometrySource, InstanceMask, DEFAULT_EVICTION_FRAMES, DEFAULT_SCRATCH_ALIGNMENT,
};
pub use top_level::{TlasReport, TopLevelBuilder};
