//! # RAYBRIDGE Core
//!
//! The cross-process runtime shared by both sides of the bridge:
//! - a process-wide identifier allocator
//! - one named mutex and three named manual-reset events
//! - the lock-step record channel
//! - the consumer's pooled GPU memory allocator
//!
//! ## Architecture Rules
//!
//! 1. **Nothing but records crosses the boundary** - no pointers, no handles
//! 2. **One frame in flight** - the producer waits for the consumer before writing
//! 3. **Fail loudly** - setup and protocol errors are fatal, never retried
//!
//! ## Example
//!
//! ```rust,ignore
//! use raybridge_core::{BridgeLink, ChannelReceiver, Namespace, Role};
//!
//! let namespace = Namespace::system_default().with_suffix("x64");
//! let link = BridgeLink::open(&namespace, Role::Consumer)?;
//! let mut receiver = ChannelReceiver::new(link);
//! let chunk = receiver.receive()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod channel;
pub mod error;
pub mod ident;
pub mod memory;
pub mod sync;

pub use channel::{
    BridgeLink, ChannelReceiver, ChannelSender, ChannelStats, Chunk, ChunkMeta, SharedChannel,
};
pub use error::{AllocError, AllocResult, ChannelError, ChannelResult, SyncError, SyncResult};
pub use ident::{next_id, IdAllocator};
pub use memory::{
    AllocatorStats, BootstrapGuard, DeviceHeap, GpuAllocator, GpuMemory, RawResource, ResourceDesc,
    ResourceKind, SubAllocatorConfig,
};
pub use sync::{NamedEvent, NamedMutex, NamedMutexGuard, Namespace, Role};
