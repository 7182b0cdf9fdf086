//! # Cross-Process Synchronization
//!
//! One named mutex and three named manual-reset events, shared by the
//! producer and the consumer.
//!
//! ```text
//!   producer                                   consumer
//!   ────────                                   ────────
//!   wait(consumer-finished)
//!   reset(consumer-finished)
//!   lock ─ write records ─ unlock
//!   set(producer-written) ───────────────────► wait(producer-written)
//!                                              lock ─ drain ─ unlock
//!                                              reset(producer-written)
//!                                              build, render
//!   wait(consumer-finished) ◄───────────────── set(consumer-finished)
//!                                              present
//!   wait(presentation-ready) ◄──────────────── set(presentation-ready)
//! ```
//!
//! Each name has exactly one creator (the owner). Creating an existing
//! name or opening a missing one is fatal; there is no degraded mode.

mod backoff;
mod event;
mod mutex;
mod namespace;
mod shared_region;

pub use backoff::Backoff;
pub use event::NamedEvent;
pub use mutex::{NamedMutex, NamedMutexGuard};
pub use namespace::Namespace;
pub use shared_region::{ObjectKind, SharedRegion, REGION_HEADER_SIZE};

/// Which side of the bridge a process is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The legacy renderer writing records
    Producer,
    /// The ray-tracing host draining them
    Consumer,
}

impl Role {
    /// The other side.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Producer => Self::Consumer,
            Self::Consumer => Self::Producer,
        }
    }

    /// Lowercase name for logs and config.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
