//! Error types for the consumer frame pipeline.

use raybridge_core::{AllocError, ChannelError};
use raybridge_shared::ProtocolError;
use thiserror::Error;

/// Result alias for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Failure while applying records or producing a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Channel or named-object failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Malformed record.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A resource could not be created. The record is dropped and later
    /// references to `id` are ignored.
    #[error("resource {id} could not be created: {source}")]
    Alloc {
        /// Producer identifier
        id: u64,
        /// Allocator failure
        #[source]
        source: AllocError,
    },

    /// The device is below a required capability.
    #[error("device {feature} is {found}, {required} required")]
    Unsupported {
        /// Capability name
        feature: &'static str,
        /// Reported level
        found: String,
        /// Minimum level
        required: String,
    },

    /// The device failed a build, upload or submission.
    #[error("device failure: {0}")]
    Device(String),

    /// Write or release of an identifier that is not live.
    #[error("resource {0} is not live")]
    UnknownResource(u64),

    /// Creation of an identifier that is already live.
    #[error("resource {0} already exists")]
    DuplicateResource(u64),

    /// Release of a mesh element that does not exist.
    #[error("mesh {mesh} element {element} does not exist")]
    UnknownMesh {
        /// Mesh identifier
        mesh: u64,
        /// Element identifier
        element: u32,
    },

    /// Upload past the end of a resource.
    #[error("write of {len} bytes at {offset} overflows resource {id} of {size} bytes")]
    WriteOutOfBounds {
        /// Resource identifier
        id: u64,
        /// Destination offset
        offset: u64,
        /// Bytes written
        len: u64,
        /// Resource size
        size: u64,
    },

    /// The upload thread stopped.
    #[error("upload worker is gone")]
    UploadWorkerGone,
}

impl RenderError {
    /// Returns true if the bridge must terminate.
    ///
    /// Only resource creation failures are survivable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Alloc { .. } => false,
            Self::Channel(error) => error.is_fatal(),
            _ => true,
        }
    }

    /// True for the shutdown request raised while waiting on the peer.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Channel(ChannelError::Shutdown))
    }
}
