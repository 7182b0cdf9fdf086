//! Error types for the cross-process runtime.
//!
//! Maps onto the bridge's failure taxonomy: setup and protocol errors are
//! fatal, resource-level failures go back to the caller that asked for
//! the resource.

use raybridge_shared::ProtocolError;
use thiserror::Error;

/// Result alias for named-object operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Result alias for GPU memory operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Failure to create, open or use a named object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// `create` found the name already taken.
    #[error("named object {name} already exists")]
    AlreadyExists {
        /// Full object name
        name: String,
    },

    /// `open` found no object with this name.
    #[error("named object {name} does not exist")]
    NotFound {
        /// Full object name
        name: String,
    },

    /// The object exists but its creator has not finished initializing it.
    #[error("named object {name} is not initialized")]
    NotReady {
        /// Full object name
        name: String,
    },

    /// The object was created by an incompatible build or is of another kind.
    #[error("named object {name} is incompatible: {reason}")]
    Incompatible {
        /// Full object name
        name: String,
        /// What did not match
        reason: &'static str,
    },

    /// The operating system refused the operation.
    #[error("I/O error on named object {name}: {message}")]
    Io {
        /// Full object name
        name: String,
        /// OS error text
        message: String,
    },

    /// The calling thread already holds this mutex.
    #[error("named mutex {name} re-entered by its owner")]
    Reentered {
        /// Full object name
        name: String,
    },
}

impl SyncError {
    /// Returns true if the bridge must terminate.
    ///
    /// Named objects have no degraded mode.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        true
    }

    pub(crate) fn io(name: &str, error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists {
                name: name.to_string(),
            },
            std::io::ErrorKind::NotFound => Self::NotFound {
                name: name.to_string(),
            },
            _ => Self::Io {
                name: name.to_string(),
                message: error.to_string(),
            },
        }
    }
}

/// Failure while exchanging a chunk over the channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Named object failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Malformed record stream.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Chunk sequence skipped or repeated.
    #[error("chunk {found} received, expected {expected}")]
    ChunkOutOfOrder {
        /// Next expected chunk sequence
        expected: u32,
        /// Chunk sequence in the channel metadata
        found: u32,
    },

    /// Channel metadata disagrees with the records it describes.
    #[error("channel metadata is inconsistent: {0}")]
    Metadata(&'static str),

    /// The shutdown flag was raised while waiting on the peer.
    #[error("shutdown requested")]
    Shutdown,
}

impl ChannelError {
    /// Returns true if the bridge must terminate.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }
}

/// GPU memory failure, reported to the resource-creation caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-sized request.
    #[error("zero-sized allocation")]
    ZeroSize,

    /// Alignment is not a power of two.
    #[error("alignment {0} is not a power of two")]
    BadAlignment(u64),

    /// The device could not provide the memory.
    #[error("device out of memory allocating {size} bytes")]
    OutOfMemory {
        /// Requested bytes
        size: u64,
    },

    /// The device rejected the request for another reason.
    #[error("device error: {0}")]
    Device(String),
}

impl AllocError {
    /// Resource-level failures never terminate the bridge by themselves.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(
            SyncError::io("RaybridgeChannel", &missing),
            SyncError::NotFound {
                name: "RaybridgeChannel".to_string()
            }
        );

        let taken = std::io::Error::from(std::io::ErrorKind::AlreadyExists);
        assert!(matches!(SyncError::io("x", &taken), SyncError::AlreadyExists { .. }));
    }

    #[test]
    fn test_fatality() {
        assert!(ChannelError::Metadata("x").is_fatal());
        assert!(!ChannelError::Shutdown.is_fatal());
        assert!(!AllocError::ZeroSize.is_fatal());
    }
}
