//! Wire protocol error types.

use thiserror::Error;

use crate::protocol::RecordTag;

/// Result alias for record encoding and decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A violation of the channel wire format.
///
/// Every variant is a fatal protocol error: the two processes disagree
/// about the layout and nothing read after it can be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header carries a tag this build does not know.
    #[error("unknown record tag {tag} at offset {offset}")]
    UnknownTag {
        /// Raw tag value
        tag: u32,
        /// Byte offset of the header
        offset: usize,
    },

    /// Payload runs past the end of the written area.
    #[error("record {tag:?} at offset {offset} claims {len} bytes, only {remaining} remain")]
    LengthOutOfRange {
        /// Record tag
        tag: RecordTag,
        /// Claimed payload length
        len: usize,
        /// Bytes left after the header
        remaining: usize,
        /// Byte offset of the header
        offset: usize,
    },

    /// Payload length does not match the record layout.
    #[error("record {tag:?} payload is {actual} bytes, expected {expected}")]
    PayloadSizeMismatch {
        /// Record tag
        tag: RecordTag,
        /// Length implied by the layout
        expected: usize,
        /// Length in the header
        actual: usize,
    },

    /// Record sequence number skipped or repeated.
    #[error("record sequence {found}, expected {expected}")]
    OutOfOrder {
        /// Next expected sequence
        expected: u32,
        /// Sequence found in the header
        found: u32,
    },

    /// Fewer records than the metadata announced.
    #[error("chunk announced {expected} records, only {found} present")]
    Truncated {
        /// Announced record count
        expected: u32,
        /// Records actually decoded
        found: u32,
    },

    /// Bytes left over after the announced records.
    #[error("{0} trailing bytes after the last record")]
    TrailingBytes(usize),

    /// Non-zero reserved field.
    #[error("reserved field set in record at offset {0}")]
    ReservedField(usize),

    /// Geometry descriptor failed validation.
    #[error("invalid geometry descriptor: {0}")]
    InvalidGeometry(&'static str),

    /// Buffer usage or index format out of range.
    #[error("invalid buffer description for resource {0}")]
    InvalidBuffer(u64),

    /// Texture identifier, dimensions or mip count out of range.
    #[error("invalid texture description for resource {id}: {reason}")]
    InvalidTexture {
        /// Resource identifier
        id: u64,
        /// First violated constraint
        reason: &'static str,
    },

    /// A create, write or release names the reserved identifier `0`.
    #[error("record {0:?} uses the unassigned identifier")]
    UnassignedId(RecordTag),

    /// Material texture count out of range.
    #[error("material {id} lists {count} textures")]
    InvalidMaterial {
        /// Material identifier
        id: u64,
        /// Claimed texture count
        count: u32,
    },

    /// Frame number did not increase.
    #[error("frame {found} after frame {previous}")]
    FrameOutOfOrder {
        /// Last accepted frame
        previous: u64,
        /// Frame in the `FrameEnd` record
        found: u64,
    },

    /// `FrameEnd` was not the last record of its chunk.
    #[error("records follow FrameEnd in the same chunk")]
    RecordsAfterFrameEnd,

    /// A single record cannot fit the channel.
    #[error("record of {size} bytes exceeds channel capacity {capacity}")]
    RecordTooLarge {
        /// Encoded record size
        size: usize,
        /// Channel capacity
        capacity: usize,
    },
}

impl ProtocolError {
    /// Returns true if the bridge must terminate.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        true
    }
}
