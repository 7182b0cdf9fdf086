//! # RAYBRIDGE Shared
//!
//! The wire protocol spoken between the legacy producer and the
//! ray-tracing consumer.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - a graphics API
//! - shared memory or OS synchronization
//! - anything that changes layout between 32-bit and 64-bit targets
//!
//! Named objects and the channel live in `raybridge_core`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod error;
pub mod protocol;
pub mod record;

pub use constants::{
    align_record, ATTRIBUTE_ABSENT, CHANNEL_MAGIC, CHANNEL_NAME, CHANNEL_VERSION,
    CONSUMER_EVENT_NAME, DEFAULT_CHANNEL_CAPACITY, MUTEX_NAME, PRESENT_EVENT_NAME,
    PRODUCER_EVENT_NAME, RECORD_ALIGNMENT, UNASSIGNED_ID,
};
pub use error::{ProtocolError, ProtocolResult};
pub use protocol::{
    BufferUsage, CreateBuffer, CreateMaterial, CreateMesh, CreateTexture, DrawInstance, FrameEnd,
    GeometryDesc, GeometryFlags, IndexFormat, MaterialFlags, RecordHeader, RecordPayload,
    RecordTag, ReleaseMesh, ReleaseResource, Transform, WriteResource, IDENTITY_TRANSFORM,
};
pub use record::{encoded_size, Record, RecordReader, RecordWriter, HEADER_SIZE};
