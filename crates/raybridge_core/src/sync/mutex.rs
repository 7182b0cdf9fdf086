//! Named mutex.
//!
//! The payload holds one 64-bit owner token: `0` when free, otherwise
//! `pid << 32 | thread index`. Locking is a compare-exchange from `0`
//! with backoff; unlocking stores `0`.
//!
//! A process that dies holding the lock leaves it held. The peer then
//! hangs in `lock`, which the bridge treats as fatal.

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::error;

use super::backoff::Backoff;
use super::namespace::Namespace;
use super::shared_region::{ObjectKind, SharedRegion};
use crate::error::{SyncError, SyncResult};

const OWNER_OFFSET: usize = 0;
const CONTENDED_OFFSET: usize = 8;
const MUTEX_PAYLOAD: usize = 16;
const UNLOCKED: u64 = 0;

static NEXT_THREAD_INDEX: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Token naming the calling thread across both processes.
fn current_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        if token.get() == UNLOCKED {
            let index = NEXT_THREAD_INDEX.fetch_add(1, Ordering::Relaxed);
            token.set((u64::from(std::process::id()) << 32) | u64::from(index));
        }
        token.get()
    })
}

/// A system-wide mutex guarding the channel metadata.
#[derive(Debug)]
pub struct NamedMutex {
    region: SharedRegion,
}

impl NamedMutex {
    /// Creates the mutex, unlocked.
    ///
    /// # Errors
    ///
    /// `SyncError::AlreadyExists` if the name is taken.
    pub fn create(namespace: &Namespace, name: &str) -> SyncResult<Self> {
        let region = SharedRegion::create(
            &namespace.path_for(name),
            &namespace.object_name(name),
            ObjectKind::Mutex,
            MUTEX_PAYLOAD,
            |_| {},
        )?;
        Ok(Self { region })
    }

    /// Opens a mutex the peer created.
    ///
    /// # Errors
    ///
    /// `SyncError::NotFound` if it does not exist yet.
    pub fn open(namespace: &Namespace, name: &str) -> SyncResult<Self> {
        let region = SharedRegion::open(
            &namespace.path_for(name),
            &namespace.object_name(name),
            ObjectKind::Mutex,
        )?;
        Ok(Self { region })
    }

    /// Full object name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.region.name()
    }

    fn owner(&self) -> &AtomicU64 {
        self.region.atomic_u64(OWNER_OFFSET)
    }

    /// Blocks until the mutex is held by the calling thread.
    ///
    /// # Errors
    ///
    /// `SyncError::Reentered` if the calling thread already holds it.
    /// Debug builds assert instead.
    pub fn lock(&self) -> SyncResult<NamedMutexGuard<'_>> {
        let token = current_token();
        let current = self.owner().load(Ordering::Relaxed);
        debug_assert_ne!(current, token, "named mutex {} re-entered", self.name());
        if current == token {
            error!(mutex = self.name(), "re-entered by its owner");
            return Err(SyncError::Reentered {
                name: self.name().to_string(),
            });
        }

        let mut backoff = Backoff::new();
        let mut contended = false;
        while self
            .owner()
            .compare_exchange_weak(UNLOCKED, token, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            contended = true;
            backoff.snooze();
        }

        if contended {
            self.region
                .atomic_u64(CONTENDED_OFFSET)
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(NamedMutexGuard { mutex: self, token })
    }

    /// Takes the mutex if it is free.
    #[must_use]
    pub fn try_lock(&self) -> Option<NamedMutexGuard<'_>> {
        let token = current_token();
        self.owner()
            .compare_exchange(UNLOCKED, token, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| NamedMutexGuard { mutex: self, token })
    }

    /// True if any thread in either process holds the mutex.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner().load(Ordering::Relaxed) != UNLOCKED
    }

    /// Number of `lock` calls that had to wait.
    #[must_use]
    pub fn contended_count(&self) -> u64 {
        self.region.atomic_u64(CONTENDED_OFFSET).load(Ordering::Relaxed)
    }
}

/// Proof that the named mutex is held. Unlocks on drop.
#[derive(Debug)]
pub struct NamedMutexGuard<'a> {
    mutex: &'a NamedMutex,
    token: u64,
}

impl NamedMutexGuard<'_> {
    /// Releases the mutex.
    #[inline]
    pub fn unlock(self) {
        drop(self);
    }

    /// Name of the held mutex.
    #[must_use]
    pub fn mutex_name(&self) -> &str {
        self.mutex.name()
    }
}

impl Drop for NamedMutexGuard<'_> {
    fn drop(&mut self) {
        let released = self.mutex.owner().compare_exchange(
            self.token,
            UNLOCKED,
            Ordering::Release,
            Ordering::Relaxed,
        );
        debug_assert!(released.is_ok(), "named mutex {} lost its owner", self.mutex.name());
    }
}
