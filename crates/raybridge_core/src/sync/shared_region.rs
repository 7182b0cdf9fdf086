//! # Shared Region
//!
//! A named, file-backed memory mapping visible to both processes.
//!
//! ```text
//! ┌──────────────────────── 64-byte object header ────────────────────────┐
//! │ magic "RBOB" │ kind │ payload_len │ version │ ready │ reserved ...     │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │ payload (payload_len bytes)                                           │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The creator writes the header and payload defaults, then publishes
//! `ready = 1` with release ordering. Openers refuse a region that is not
//! ready or was written by another layout version.
//!
//! This module requires unsafe code: payload words are reinterpreted as
//! atomics shared with the peer process.

#![allow(unsafe_code)]

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::MmapMut;
use raybridge_shared::CHANNEL_VERSION;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Size of the object header in front of every payload.
pub const REGION_HEADER_SIZE: usize = 64;

/// Magic at offset 0 of every named object ("RBOB").
const OBJECT_MAGIC: u32 = u32::from_le_bytes(*b"RBOB");

const MAGIC_OFFSET: usize = 0;
const KIND_OFFSET: usize = 4;
const PAYLOAD_LEN_OFFSET: usize = 8;
const VERSION_OFFSET: usize = 12;
const READY_OFFSET: usize = 16;

/// What a named object is used for.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// Named mutex
    Mutex = 1,
    /// Manual-reset event
    Event = 2,
    /// Record channel
    Channel = 3,
}

/// A mapped named object.
///
/// The creating side owns the name and unlinks it on drop; an opener only
/// drops its mapping.
pub struct SharedRegion {
    name: String,
    path: PathBuf,
    owner: bool,
    payload_len: usize,
    base: *mut u8,
    // Keeps `base` valid. Never accessed directly.
    _map: MmapMut,
}

// SAFETY: the mapping is not tied to a thread. Payload words are only
// touched through atomics, and byte ranges only through `copy_in`/`copy_out`,
// whose callers hold the named mutex.
unsafe impl Send for SharedRegion {}
// SAFETY: see `Send`. `&SharedRegion` exposes no non-atomic interior access.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Creates the object. Fails if the name is taken.
    ///
    /// `init` runs before the object is published, so an opener never
    /// observes default payload words.
    ///
    /// # Errors
    ///
    /// `SyncError::AlreadyExists` if the name exists, `SyncError::Io` if the
    /// backing file cannot be sized or mapped.
    pub fn create(
        path: &Path,
        name: &str,
        kind: ObjectKind,
        payload_len: usize,
        init: impl FnOnce(&Self),
    ) -> SyncResult<Self> {
        let declared_len = u32::try_from(payload_len).map_err(|_| SyncError::Incompatible {
            name: name.to_string(),
            reason: "payload does not fit the header",
        })?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|error| SyncError::io(name, &error))?;

        let fail = |error: std::io::Error| {
            let _ = std::fs::remove_file(path);
            SyncError::io(name, &error)
        };

        file.set_len((REGION_HEADER_SIZE + payload_len) as u64)
            .map_err(fail)?;

        // SAFETY: the file was created above with create_new, is sized to
        // header + payload and is never truncated while mapped.
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(fail)?;
        let base = map.as_mut_ptr();

        let region = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            owner: true,
            payload_len,
            base,
            _map: map,
        };

        region.header_word(MAGIC_OFFSET).store(OBJECT_MAGIC, Ordering::Relaxed);
        region.header_word(KIND_OFFSET).store(kind as u32, Ordering::Relaxed);
        region
            .header_word(PAYLOAD_LEN_OFFSET)
            .store(declared_len, Ordering::Relaxed);
        region
            .header_word(VERSION_OFFSET)
            .store(CHANNEL_VERSION, Ordering::Relaxed);
        init(&region);
        region.header_word(READY_OFFSET).store(1, Ordering::Release);

        debug!(object = %name, ?kind, payload_len, "created named object");
        Ok(region)
    }

    /// Opens an object created by the peer.
    ///
    /// # Errors
    ///
    /// `SyncError::NotFound` if nobody created it, `SyncError::NotReady` if the
    /// creator has not published it, `SyncError::Incompatible` on a header
    /// mismatch.
    pub fn open(path: &Path, name: &str, kind: ObjectKind) -> SyncResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|error| SyncError::io(name, &error))?;

        let file_len = file
            .metadata()
            .map_err(|error| SyncError::io(name, &error))?
            .len();
        let file_len = usize::try_from(file_len).map_err(|_| SyncError::Incompatible {
            name: name.to_string(),
            reason: "object larger than the address space",
        })?;
        if file_len < REGION_HEADER_SIZE {
            return Err(SyncError::NotReady {
                name: name.to_string(),
            });
        }

        // SAFETY: the file holds at least a header; its creator never
        // truncates it, and the mapping length is taken from its size now.
        let mut map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|error| SyncError::io(name, &error))?;
        let base = map.as_mut_ptr();

        let mut region = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            owner: false,
            payload_len: 0,
            base,
            _map: map,
        };

        let incompatible = |reason| SyncError::Incompatible {
            name: name.to_string(),
            reason,
        };

        if region.header_word(READY_OFFSET).load(Ordering::Acquire) != 1 {
            return Err(SyncError::NotReady {
                name: name.to_string(),
            });
        }
        if region.header_word(MAGIC_OFFSET).load(Ordering::Relaxed) != OBJECT_MAGIC {
            return Err(incompatible("bad magic"));
        }
        if region.header_word(VERSION_OFFSET).load(Ordering::Relaxed) != CHANNEL_VERSION {
            return Err(incompatible("layout version mismatch"));
        }
        if region.header_word(KIND_OFFSET).load(Ordering::Relaxed) != kind as u32 {
            return Err(incompatible("object kind mismatch"));
        }

        let declared = region.header_word(PAYLOAD_LEN_OFFSET).load(Ordering::Relaxed) as usize;
        if REGION_HEADER_SIZE + declared > file_len {
            return Err(incompatible("payload shorter than declared"));
        }
        region.payload_len = declared;

        debug!(object = %name, ?kind, "opened named object");
        Ok(region)
    }

    /// Full object name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this process created the object.
    #[inline]
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        self.owner
    }

    /// Payload size in bytes.
    #[inline]
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    #[allow(clippy::cast_ptr_alignment)]
    fn header_word(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= REGION_HEADER_SIZE);
        // SAFETY: the mapping is page-aligned and at least REGION_HEADER_SIZE
        // long; offset is 4-aligned and inside the header. AtomicU32 has the
        // layout of u32 and lives as long as the mapping, i.e. `self`.
        unsafe { &*self.base.add(offset).cast::<AtomicU32>() }
    }

    /// The 32-bit payload word at `offset`.
    ///
    /// # Panics
    ///
    /// If `offset` is unaligned or out of bounds.
    #[allow(clippy::cast_ptr_alignment)]
    pub fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.payload_len,
            "payload word {offset} outside {}",
            self.name
        );
        // SAFETY: bounds and alignment checked above; the payload starts at a
        // 64-byte offset into a page-aligned mapping.
        unsafe { &*self.base.add(REGION_HEADER_SIZE + offset).cast::<AtomicU32>() }
    }

    /// The 64-bit payload word at `offset`.
    ///
    /// # Panics
    ///
    /// If `offset` is unaligned or out of bounds.
    #[allow(clippy::cast_ptr_alignment)]
    pub fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        assert!(
            offset % 8 == 0 && offset + 8 <= self.payload_len,
            "payload word {offset} outside {}",
            self.name
        );
        // SAFETY: as for `atomic_u32`, with 8-byte alignment.
        unsafe { &*self.base.add(REGION_HEADER_SIZE + offset).cast::<AtomicU64>() }
    }

    /// Copies `bytes` into the payload at `offset`.
    ///
    /// # Safety
    ///
    /// No other thread or process may access `offset..offset + bytes.len()`
    /// concurrently. The channel guarantees this by holding the named mutex.
    ///
    /// # Panics
    ///
    /// If the range is out of bounds.
    pub unsafe fn copy_in(&self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.payload_len, "copy past end of {}", self.name);
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            self.base.add(REGION_HEADER_SIZE + offset),
            bytes.len(),
        );
    }

    /// Copies `out.len()` payload bytes starting at `offset` into `out`.
    ///
    /// # Safety
    ///
    /// Same contract as `copy_in`.
    ///
    /// # Panics
    ///
    /// If the range is out of bounds.
    pub unsafe fn copy_out(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.payload_len, "copy past end of {}", self.name);
        std::ptr::copy_nonoverlapping(
            self.base.add(REGION_HEADER_SIZE + offset),
            out.as_mut_ptr(),
            out.len(),
        );
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owner {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(object = %self.name, "released named object"),
                Err(error) => debug!(object = %self.name, %error, "named object already gone"),
            }
        }
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("payload_len", &self.payload_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "raybridge_region_{tag}_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn test_create_then_open_shares_words() {
        let path = temp_path("share");
        let created = SharedRegion::create(&path, "share", ObjectKind::Event, 16, |region| {
            region.atomic_u32(0).store(7, Ordering::Relaxed);
        })
        .unwrap();
        let opened = SharedRegion::open(&path, "share", ObjectKind::Event).unwrap();

        assert_eq!(opened.payload_len(), 16);
        assert_eq!(opened.atomic_u32(0).load(Ordering::Acquire), 7);

        opened.atomic_u64(8).store(u64::MAX, Ordering::Release);
        assert_eq!(created.atomic_u64(8).load(Ordering::Acquire), u64::MAX);
    }

    #[test]
    fn test_create_twice_fails() {
        let path = temp_path("twice");
        let _first = SharedRegion::create(&path, "twice", ObjectKind::Mutex, 8, |_| {}).unwrap();
        let second = SharedRegion::create(&path, "twice", ObjectKind::Mutex, 8, |_| {});
        assert!(matches!(second, Err(SyncError::AlreadyExists { .. })));
    }

    #[test]
    fn test_open_before_create_fails() {
        let path = temp_path("missing");
        let result = SharedRegion::open(&path, "missing", ObjectKind::Channel);
        assert!(matches!(result, Err(SyncError::NotFound { .. })));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_oversized_payload_is_rejected() {
        let path = temp_path("oversized");
        let payload_len = usize::try_from(u64::from(u32::MAX) + 1).unwrap();
        let result = SharedRegion::create(&path, "oversized", ObjectKind::Channel, payload_len, |_| {});
        assert!(matches!(result, Err(SyncError::Incompatible { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let path = temp_path("kind");
        let _created = SharedRegion::create(&path, "kind", ObjectKind::Mutex, 8, |_| {}).unwrap();
        let result = SharedRegion::open(&path, "kind", ObjectKind::Event);
        assert!(matches!(result, Err(SyncError::Incompatible { .. })));
    }

    #[test]
    fn test_unpublished_region_is_not_ready() {
        let path = temp_path("unready");
        std::fs::write(&path, [0u8; REGION_HEADER_SIZE + 8]).unwrap();
        let result = SharedRegion::open(&path, "unready", ObjectKind::Event);
        assert!(matches!(result, Err(SyncError::NotReady { .. })));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_owner_unlinks_on_drop() {
        let path = temp_path("unlink");
        let created = SharedRegion::create(&path, "unlink", ObjectKind::Event, 8, |_| {}).unwrap();
        let opened = SharedRegion::open(&path, "unlink", ObjectKind::Event).unwrap();

        drop(opened);
        assert!(path.exists());
        drop(created);
        assert!(!path.exists());
    }

    #[test]
    fn test_copy_round_trip() {
        let path = temp_path("copy");
        let region = SharedRegion::create(&path, "copy", ObjectKind::Channel, 64, |_| {}).unwrap();
        let mut out = [0u8; 4];
        // SAFETY: single-threaded test, no concurrent access.
        unsafe {
            region.copy_in(10, &[1, 2, 3, 4]);
            region.copy_out(10, &mut out);
        }
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
