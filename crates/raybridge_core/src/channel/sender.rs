//! Producer side of the channel.
//!
//! Records are staged in process memory and copied into the channel in
//! one piece on commit. A frame that does not fit is split: each full
//! staging buffer goes out as a continuation chunk, and the chunk holding
//! `FrameEnd` closes the frame.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use raybridge_shared::{
    encoded_size, FrameEnd, GeometryDesc, ProtocolError, Record, RecordPayload, RecordWriter,
    WriteResource,
};
use tracing::{debug, trace};

use super::layout::ChunkMeta;
use super::link::BridgeLink;
use super::ChannelStats;
use crate::error::{ChannelError, ChannelResult};
use crate::sync::NamedEvent;

/// Writes records for the consumer.
#[derive(Debug)]
pub struct ChannelSender {
    link: BridgeLink,
    staging: RecordWriter,
    next_chunk: u32,
    last_frame: Option<u64>,
    shutdown: Option<Arc<AtomicBool>>,
    stats: ChannelStats,
}

impl ChannelSender {
    /// Wraps an established link.
    #[must_use]
    pub fn new(link: BridgeLink) -> Self {
        let staging = RecordWriter::with_capacity(link.capacity());
        Self {
            link,
            staging,
            next_chunk: 0,
            last_frame: None,
            shutdown: None,
            stats: ChannelStats::default(),
        }
    }

    /// Makes every wait give up with `ChannelError::Shutdown` once `flag` is raised.
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

    /// Bytes staged for the next chunk.
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staging.len()
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Stages a fixed-size record.
    ///
    /// `FrameEnd` must go through `end_frame`.
    ///
    /// # Errors
    ///
    /// Fails if a continuation chunk had to be committed and that failed.
    pub fn send<T: RecordPayload>(&mut self, payload: &T) -> ChannelResult<()> {
        self.reserve(encoded_size(std::mem::size_of::<T>()))?;
        self.staging.push(payload);
        Ok(())
    }

    /// Stages an upload.
    ///
    /// # Errors
    ///
    /// `ProtocolError::RecordTooLarge` if the record cannot fit the channel.
    pub fn send_write(&mut self, id: u64, offset: u64, data: &[u8]) -> ChannelResult<()> {
        self.reserve(encoded_size(std::mem::size_of::<WriteResource>() + data.len()))?;
        self.staging.push_write(id, offset, data);
        Ok(())
    }

    /// Stages a mesh element.
    ///
    /// # Errors
    ///
    /// `ProtocolError::RecordTooLarge` if the record cannot fit the channel.
    pub fn send_mesh(
        &mut self,
        mesh: u64,
        element: u32,
        geometries: &[GeometryDesc],
    ) -> ChannelResult<()> {
        let payload = std::mem::size_of::<raybridge_shared::CreateMesh>()
            + geometries.len() * GeometryDesc::SIZE;
        self.reserve(encoded_size(payload))?;
        self.staging.push_mesh(mesh, element, geometries);
        Ok(())
    }

    /// Stages any record. A `FrameEnd` closes the frame.
    ///
    /// # Errors
    ///
    /// As the specific senders.
    pub fn send_record(&mut self, record: &Record) -> ChannelResult<()> {
        if let Record::FrameEnd(end) = record {
            return self.end_frame(end.frame, end.reset_accumulation != 0);
        }
        self.reserve(record.encoded_len())?;
        self.staging.push_record(record);
        Ok(())
    }

    /// Appends `FrameEnd` and hands the chunk to the consumer.
    ///
    /// Blocks until the consumer has finished the previous chunk.
    ///
    /// # Errors
    ///
    /// `ProtocolError::FrameOutOfOrder` if `frame` does not increase,
    /// `ChannelError::Shutdown` if the shutdown flag is raised while waiting.
    pub fn end_frame(&mut self, frame: u64, reset_accumulation: bool) -> ChannelResult<()> {
        if let Some(previous) = self.last_frame {
            if frame <= previous {
                return Err(ProtocolError::FrameOutOfOrder {
                    previous,
                    found: frame,
                }
                .into());
            }
        }

        self.reserve(encoded_size(std::mem::size_of::<FrameEnd>()))?;
        self.staging.push(&FrameEnd {
            frame,
            reset_accumulation: u32::from(reset_accumulation),
            reserved: 0,
        });
        self.commit(frame)?;

        self.last_frame = Some(frame);
        self.stats.frames += 1;
        Ok(())
    }

    /// Waits until the consumer has a displayable image, then clears the signal.
    ///
    /// # Errors
    ///
    /// `ChannelError::Shutdown` if the shutdown flag is raised while waiting.
    pub fn wait_presented(&self) -> ChannelResult<()> {
        self.wait_for(self.link.presentation_ready())?;
        self.link.presentation_ready().reset();
        Ok(())
    }

    fn reserve(&mut self, encoded: usize) -> ChannelResult<()> {
        let capacity = self.link.capacity();
        if encoded > capacity {
            return Err(ProtocolError::RecordTooLarge {
                size: encoded,
                capacity,
            }
            .into());
        }
        if self.staging.len() + encoded > capacity {
            debug!(staged = self.staging.len(), "channel full, committing continuation chunk");
            self.commit(0)?;
            self.stats.continuation_chunks += 1;
        }
        Ok(())
    }

    fn wait_for(&self, event: &NamedEvent) -> ChannelResult<()> {
        match &self.shutdown {
            Some(flag) => {
                if event.wait_until(flag) {
                    Ok(())
                } else {
                    Err(ChannelError::Shutdown)
                }
            }
            None => {
                event.wait();
                Ok(())
            }
        }
    }

    fn commit(&mut self, frame: u64) -> ChannelResult<()> {
        let started = Instant::now();

        // The reset precedes the write so the acknowledgement of this chunk
        // cannot be erased by it.
        self.wait_for(self.link.consumer_finished())?;
        self.link.consumer_finished().reset();

        let meta = ChunkMeta {
            // Staging never outgrows the channel capacity, itself a u32.
            write_len: u32::try_from(self.staging.len()).unwrap_or(u32::MAX),
            record_count: self.staging.record_count(),
            chunk_sequence: self.next_chunk,
            frame,
        };
        {
            let guard = self.link.mutex().lock()?;
            self.link
                .channel()
                .publish(&guard, self.staging.as_bytes(), &meta);
        }
        self.link.producer_written().set();

        trace!(
            chunk = meta.chunk_sequence,
            records = meta.record_count,
            bytes = meta.write_len,
            waited = ?started.elapsed(),
            "committed chunk"
        );

        self.stats.chunks += 1;
        self.stats.records += u64::from(meta.record_count);
        self.stats.bytes += u64::from(meta.write_len);
        self.next_chunk = self.next_chunk.wrapping_add(1);
        self.staging.reset();
        Ok(())
    }
}
