//! # Bridge Constants
//!
//! Names and sizes both executables agree on at build time.
//!
//! **CRITICAL:** These values are baked into both binaries.
//! Changing any of them requires redeploying producer and consumer together.

// =============================================================================
// NAMED OBJECTS
// =============================================================================

/// Named mutex guarding the channel metadata.
pub const MUTEX_NAME: &str = "RaybridgeChannelMutex";

/// Event: the producer has written a chunk of records.
pub const PRODUCER_EVENT_NAME: &str = "RaybridgeProducerEvent";

/// Event: the consumer has drained the channel and finished the frame's CPU work.
pub const CONSUMER_EVENT_NAME: &str = "RaybridgeConsumerEvent";

/// Event: the consumer has a displayable image.
pub const PRESENT_EVENT_NAME: &str = "RaybridgePresentEvent";

/// Shared memory region carrying the records.
pub const CHANNEL_NAME: &str = "RaybridgeChannel";

// =============================================================================
// CHANNEL LAYOUT
// =============================================================================

/// Magic tag at the start of the channel metadata ("RBCH").
pub const CHANNEL_MAGIC: u32 = u32::from_le_bytes(*b"RBCH");

/// Wire format version. Bumped on any layout change.
pub const CHANNEL_VERSION: u32 = 1;

/// Every record (header + payload) starts on this boundary.
pub const RECORD_ALIGNMENT: usize = 16;

/// Default capacity of the record area in bytes (16 MiB).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16 * 1024 * 1024;

/// Sentinel for "no identifier assigned".
pub const UNASSIGNED_ID: u64 = 0;

/// Attribute offset meaning "this vertex attribute is absent".
pub const ATTRIBUTE_ABSENT: u16 = 0xFFFF;

/// Maximum number of texture slots on a material record.
pub const MAX_MATERIAL_TEXTURES: usize = 16;

/// Maximum number of float4 parameters on a material record.
pub const MAX_MATERIAL_PARAMETERS: usize = 16;

/// Maximum number of texcoord sets on a geometry descriptor.
pub const MAX_TEXCOORD_SETS: usize = 4;

/// Rounds `value` up to the record alignment.
#[inline]
#[must_use]
pub const fn align_record(value: usize) -> usize {
    (value + RECORD_ALIGNMENT - 1) & !(RECORD_ALIGNMENT - 1)
}
