//! # Command Channel
//!
//! The shared region through which the producer hands one frame of records
//! to the consumer. At most one chunk is in flight: the producer waits for
//! *consumer-has-finished* before it overwrites the region.
//!
//! ## Usage
//!
//! ```rust,ignore
//! // producer
//! let mut sender = ChannelSender::new(BridgeLink::create(&ns, Role::Producer, capacity)?);
//! sender.send(&draw)?;
//! sender.end_frame(frame, false)?;
//!
//! // consumer
//! let mut receiver = ChannelReceiver::new(BridgeLink::open(&ns, Role::Consumer)?);
//! let chunk = receiver.receive()?;
//! // apply, build, render
//! receiver.acknowledge();
//! receiver.present();
//! ```

mod layout;
mod link;
mod receiver;
mod sender;

pub use layout::{ChunkMeta, SharedChannel, META_SIZE};
pub use link::BridgeLink;
pub use receiver::{ChannelReceiver, Chunk};
pub use sender::ChannelSender;

/// Counters kept by either end of the channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Chunks handed over
    pub chunks: u64,
    /// Chunks without `FrameEnd`
    pub continuation_chunks: u64,
    /// Frames closed
    pub frames: u64,
    /// Records handed over
    pub records: u64,
    /// Encoded bytes handed over
    pub bytes: u64,
}
