//! Consumer side of the channel.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use raybridge_shared::{FrameEnd, ProtocolError, ProtocolResult, Record, RecordReader};
use tracing::trace;

use super::link::BridgeLink;
use super::ChannelStats;
use crate::error::{ChannelError, ChannelResult};

/// Records drained from the channel in one handoff.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    /// Chunk counter
    pub sequence: u32,
    /// Records in FIFO order, `FrameEnd` included
    pub records: Vec<Record>,
    /// The frame this chunk closes, if any
    pub frame_end: Option<FrameEnd>,
}

impl Chunk {
    /// True if the chunk carries `FrameEnd`.
    #[must_use]
    pub const fn ends_frame(&self) -> bool {
        self.frame_end.is_some()
    }
}

/// Drains records written by the producer.
#[derive(Debug)]
pub struct ChannelReceiver {
    link: BridgeLink,
    buffer: Vec<u8>,
    next_chunk: u32,
    last_frame: Option<u64>,
    shutdown: Option<Arc<AtomicBool>>,
    stats: ChannelStats,
}

impl ChannelReceiver {
    /// Wraps an established link.
    #[must_use]
    pub fn new(link: BridgeLink) -> Self {
        let buffer = Vec::with_capacity(link.capacity());
        Self {
            link,
            buffer,
            next_chunk: 0,
            last_frame: None,
            shutdown: None,
            stats: ChannelStats::default(),
        }
    }

    /// Makes `receive` give up with `ChannelError::Shutdown` once `flag` is raised.
    #[must_use]
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// The underlying named objects.
    #[must_use]
    pub const fn link(&self) -> &BridgeLink {
        &self.link
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Last frame number received.
    #[must_use]
    pub const fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    /// True if a chunk is waiting.
    #[must_use]
    pub fn poll(&self) -> bool {
        self.link.producer_written().poll()
    }

    /// Blocks for the next chunk and drains it.
    ///
    /// # Errors
    ///
    /// Any malformed record or inconsistent metadata is fatal.
    /// `ChannelError::Shutdown` if the shutdown flag is raised while waiting.
    pub fn receive(&mut self) -> ChannelResult<Chunk> {
        let written = self.link.producer_written();
        match &self.shutdown {
            Some(flag) => {
                if !written.wait_until(flag) {
                    return Err(ChannelError::Shutdown);
                }
            }
            None => written.wait(),
        }
        self.drain()
    }

    /// Drains a chunk if one is waiting.
    ///
    /// # Errors
    ///
    /// As `receive`.
    pub fn try_receive(&mut self) -> ChannelResult<Option<Chunk>> {
        if self.poll() {
            self.drain().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Signals *consumer-has-finished* for the drained chunk.
    pub fn acknowledge(&self) {
        self.link.consumer_finished().set();
    }

    /// Signals *presentation-is-ready*.
    pub fn present(&self) {
        self.link.presentation_ready().set();
    }

    fn drain(&mut self) -> ChannelResult<Chunk> {
        let meta = {
            let guard = self.link.mutex().lock()?;
            self.link.channel().take(&guard, &mut self.buffer)?
        };
        self.link.producer_written().reset();

        if meta.chunk_sequence != self.next_chunk {
            return Err(ChannelError::ChunkOutOfOrder {
                expected: self.next_chunk,
                found: meta.chunk_sequence,
            });
        }

        let records: Vec<Record> =
            RecordReader::new(&self.buffer, meta.record_count).collect::<ProtocolResult<_>>()?;

        let frame_end = match records
            .iter()
            .position(|record| matches!(record, Record::FrameEnd(_)))
        {
            Some(index) if index + 1 != records.len() => {
                return Err(ProtocolError::RecordsAfterFrameEnd.into());
            }
            Some(index) => match &records[index] {
                Record::FrameEnd(end) => Some(*end),
                _ => None,
            },
            None => None,
        };

        match frame_end {
            Some(end) => {
                if let Some(previous) = self.last_frame {
                    if end.frame <= previous {
                        return Err(ProtocolError::FrameOutOfOrder {
                            previous,
                            found: end.frame,
                        }
                        .into());
                    }
                }
                if meta.frame != end.frame {
                    return Err(ChannelError::Metadata("frame number disagrees with FrameEnd"));
                }
                self.last_frame = Some(end.frame);
                self.stats.frames += 1;
            }
            None => {
                if meta.frame != 0 {
                    return Err(ChannelError::Metadata("continuation chunk carries a frame number"));
                }
                self.stats.continuation_chunks += 1;
            }
        }

        trace!(
            chunk = meta.chunk_sequence,
            records = records.len(),
            bytes = meta.write_len,
            "drained chunk"
        );

        self.stats.chunks += 1;
        self.stats.records += records.len() as u64;
        self.stats.bytes += u64::from(meta.write_len);
        self.next_chunk = self.next_chunk.wrapping_add(1);

        Ok(Chunk {
            sequence: meta.chunk_sequence,
            records,
            frame_end,
        })
    }
}
