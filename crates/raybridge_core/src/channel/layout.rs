//! Channel region layout.
//!
//! ```text
//! payload offset
//!   0  magic "RBCH"      u32
//!   4  version           u32
//!   8  capacity          u32   record area size
//!  12  write_len         u32   bytes of records in the current chunk
//!  16  record_count      u32
//!  20  chunk_sequence    u32
//!  24  frame             u64   FrameEnd.frame, 0 for continuation chunks
//!  64  records ...
//! ```
//!
//! Everything past the constant words is only touched under the named mutex.

#![allow(unsafe_code)]

use std::sync::atomic::Ordering;

use raybridge_shared::{CHANNEL_MAGIC, CHANNEL_NAME, CHANNEL_VERSION};

use crate::error::{ChannelError, ChannelResult, SyncError, SyncResult};
use crate::sync::{Namespace, NamedMutexGuard, ObjectKind, SharedRegion};

const MAGIC: usize = 0;
const VERSION: usize = 4;
const CAPACITY: usize = 8;
const WRITE_LEN: usize = 12;
const RECORD_COUNT: usize = 16;
const CHUNK_SEQUENCE: usize = 20;
const FRAME: usize = 24;

/// Bytes in front of the record area.
pub const META_SIZE: usize = 64;

/// Description of the chunk currently in the channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Bytes of encoded records
    pub write_len: u32,
    /// Number of records
    pub record_count: u32,
    /// Chunk counter, starting at 0
    pub chunk_sequence: u32,
    /// Frame closed by this chunk, or 0 for a continuation chunk
    pub frame: u64,
}

/// The mapped channel.
#[derive(Debug)]
pub struct SharedChannel {
    region: SharedRegion,
    capacity: usize,
}

impl SharedChannel {
    /// Creates the channel with a record area of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// `SyncError::AlreadyExists` if the name is taken,
    /// `SyncError::Incompatible` if `capacity` does not fit in 32 bits.
    pub fn create(namespace: &Namespace, capacity: usize) -> SyncResult<Self> {
        let capacity_word = u32::try_from(capacity).map_err(|_| SyncError::Incompatible {
            name: namespace.object_name(CHANNEL_NAME),
            reason: "capacity exceeds 4 GiB",
        })?;
        let region = SharedRegion::create(
            &namespace.path_for(CHANNEL_NAME),
            &namespace.object_name(CHANNEL_NAME),
            ObjectKind::Channel,
            META_SIZE + capacity,
            |region| {
                region.atomic_u32(MAGIC).store(CHANNEL_MAGIC, Ordering::Relaxed);
                region.atomic_u32(VERSION).store(CHANNEL_VERSION, Ordering::Relaxed);
                region.atomic_u32(CAPACITY).store(capacity_word, Ordering::Relaxed);
            },
        )?;
        Ok(Self { region, capacity })
    }

    /// Opens the channel the peer created.
    ///
    /// # Errors
    ///
    /// `SyncError::NotFound` if it does not exist, `SyncError::Incompatible`
    /// if its layout differs from this build.
    pub fn open(namespace: &Namespace) -> SyncResult<Self> {
        let region = SharedRegion::open(
            &namespace.path_for(CHANNEL_NAME),
            &namespace.object_name(CHANNEL_NAME),
            ObjectKind::Channel,
        )?;
        let incompatible = |reason| SyncError::Incompatible {
            name: region.name().to_string(),
            reason,
        };

        if region.payload_len() < META_SIZE {
            return Err(incompatible("channel metadata truncated"));
        }
        if region.atomic_u32(MAGIC).load(Ordering::Relaxed) != CHANNEL_MAGIC {
            return Err(incompatible("bad channel magic"));
        }
        if region.atomic_u32(VERSION).load(Ordering::Relaxed) != CHANNEL_VERSION {
            return Err(incompatible("channel version mismatch"));
        }
        let capacity = region.atomic_u32(CAPACITY).load(Ordering::Relaxed) as usize;
        if META_SIZE + capacity > region.payload_len() {
            return Err(incompatible("record area shorter than capacity"));
        }

        Ok(Self { region, capacity })
    }

    /// Size of the record area in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Full object name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Writes a chunk and its metadata.
    ///
    /// # Panics
    ///
    /// If `records` is larger than the capacity. The sender splits chunks
    /// before this point.
    pub fn publish(&self, _lock: &NamedMutexGuard<'_>, records: &[u8], meta: &ChunkMeta) {
        assert!(records.len() <= self.capacity, "chunk larger than the channel");
        // SAFETY: the named mutex is held (witnessed by `_lock`), so the peer
        // is not reading the record area.
        unsafe { self.region.copy_in(META_SIZE, records) };

        self.region.atomic_u32(WRITE_LEN).store(meta.write_len, Ordering::Relaxed);
        self.region
            .atomic_u32(RECORD_COUNT)
            .store(meta.record_count, Ordering::Relaxed);
        self.region
            .atomic_u32(CHUNK_SEQUENCE)
            .store(meta.chunk_sequence, Ordering::Relaxed);
        self.region.atomic_u64(FRAME).store(meta.frame, Ordering::Relaxed);
    }

    /// Copies the current chunk into `out` and marks the channel drained.
    ///
    /// # Errors
    ///
    /// `ChannelError::Metadata` if the write length exceeds the capacity.
    pub fn take(&self, _lock: &NamedMutexGuard<'_>, out: &mut Vec<u8>) -> ChannelResult<ChunkMeta> {
        let meta = ChunkMeta {
            write_len: self.region.atomic_u32(WRITE_LEN).load(Ordering::Relaxed),
            record_count: self.region.atomic_u32(RECORD_COUNT).load(Ordering::Relaxed),
            chunk_sequence: self.region.atomic_u32(CHUNK_SEQUENCE).load(Ordering::Relaxed),
            frame: self.region.atomic_u64(FRAME).load(Ordering::Relaxed),
        };

        let len = meta.write_len as usize;
        if len > self.capacity {
            return Err(ChannelError::Metadata("write length exceeds capacity"));
        }

        out.clear();
        out.resize(len, 0);
        // SAFETY: the named mutex is held, so the producer is not writing.
        unsafe { self.region.copy_out(META_SIZE, out) };

        self.region.atomic_u32(WRITE_LEN).store(0, Ordering::Relaxed);
        self.region.atomic_u32(RECORD_COUNT).store(0, Ordering::Relaxed);
        Ok(meta)
    }
}
