//! Named manual-reset event.
//!
//! A single state word in a shared region: `1` signaled, `0` not.
//! `set` and `reset` are idempotent; waiters do not consume the signal.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use super::backoff::Backoff;
use super::namespace::Namespace;
use super::shared_region::{ObjectKind, SharedRegion};
use crate::error::SyncResult;

const STATE_OFFSET: usize = 0;
const SET_COUNT_OFFSET: usize = 4;
const EVENT_PAYLOAD: usize = 8;

/// A binary event visible to both processes.
#[derive(Debug)]
pub struct NamedEvent {
    region: SharedRegion,
}

impl NamedEvent {
    /// Creates the event. Only the owner calls this, before the peer opens.
    ///
    /// # Errors
    ///
    /// `SyncError::AlreadyExists` if the name is taken.
    pub fn create(namespace: &Namespace, name: &str, initial_state: bool) -> SyncResult<Self> {
        Self::create_at(&namespace.path_for(name), &namespace.object_name(name), initial_state)
    }

    /// Opens an event the peer created.
    ///
    /// # Errors
    ///
    /// `SyncError::NotFound` if it does not exist yet.
    pub fn open(namespace: &Namespace, name: &str) -> SyncResult<Self> {
        let region = SharedRegion::open(
            &namespace.path_for(name),
            &namespace.object_name(name),
            ObjectKind::Event,
        )?;
        Ok(Self { region })
    }

    fn create_at(path: &Path, name: &str, initial_state: bool) -> SyncResult<Self> {
        let region = SharedRegion::create(path, name, ObjectKind::Event, EVENT_PAYLOAD, |region| {
            region
                .atomic_u32(STATE_OFFSET)
                .store(u32::from(initial_state), Ordering::Relaxed);
        })?;
        Ok(Self { region })
    }

    /// Full object name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Signals the event.
    #[inline]
    pub fn set(&self) {
        self.region.atomic_u32(SET_COUNT_OFFSET).fetch_add(1, Ordering::Relaxed);
        self.region.atomic_u32(STATE_OFFSET).store(1, Ordering::Release);
        trace!(event = self.name(), "set");
    }

    /// Clears the event.
    #[inline]
    pub fn reset(&self) {
        self.region.atomic_u32(STATE_OFFSET).store(0, Ordering::Release);
        trace!(event = self.name(), "reset");
    }

    /// Non-blocking check.
    #[inline]
    #[must_use]
    pub fn poll(&self) -> bool {
        self.region.atomic_u32(STATE_OFFSET).load(Ordering::Acquire) == 1
    }

    /// Number of times the event was set since creation. Diagnostic only.
    #[must_use]
    pub fn set_count(&self) -> u32 {
        self.region.atomic_u32(SET_COUNT_OFFSET).load(Ordering::Relaxed)
    }

    /// Blocks until signaled. Never times out.
    pub fn wait(&self) {
        let mut backoff = Backoff::new();
        while !self.poll() {
            backoff.snooze();
        }
    }

    /// Blocks until signaled or `shutdown` is raised.
    ///
    /// Returns true if the event was signaled.
    pub fn wait_until(&self, shutdown: &AtomicBool) -> bool {
        let mut backoff = Backoff::new();
        loop {
            if self.poll() {
                return true;
            }
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            backoff.snooze();
        }
    }

    /// Blocks until signaled or `timeout` elapses.
    ///
    /// Returns true if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();
        loop {
            if self.poll() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            backoff.snooze();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn namespace(tag: &str) -> Namespace {
        Namespace::new(std::env::temp_dir()).with_suffix(format!(
            "{tag}_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn test_initial_state() {
        let ns = namespace("event_initial");
        let on = NamedEvent::create(&ns, "On", true).unwrap();
        let off = NamedEvent::create(&ns, "Off", false).unwrap();
        assert!(on.poll());
        assert!(!off.poll());
    }

    #[test]
    fn test_set_reset_idempotent() {
        let ns = namespace("event_idem");
        let event = NamedEvent::create(&ns, "Event", false).unwrap();
        let peer = NamedEvent::open(&ns, "Event").unwrap();

        event.set();
        event.set();
        assert!(peer.poll());
        assert!(peer.poll(), "waiting does not consume the signal");

        peer.reset();
        peer.reset();
        assert!(!event.poll());
        assert_eq!(event.set_count(), 2);
    }

    #[test]
    fn test_open_missing_fails() {
        let ns = namespace("event_missing");
        assert!(NamedEvent::open(&ns, "Nobody").is_err());
    }

    #[test]
    fn test_wait_wakes_on_set() {
        let ns = namespace("event_wake");
        let event = NamedEvent::create(&ns, "Wake", false).unwrap();
        let peer = NamedEvent::open(&ns, "Wake").unwrap();

        let waiter = std::thread::spawn(move || {
            peer.wait();
            peer.poll()
        });
        std::thread::sleep(Duration::from_millis(5));
        event.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_until_observes_shutdown() {
        let ns = namespace("event_shutdown");
        let event = NamedEvent::create(&ns, "Never", false).unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            flag.store(true, Ordering::Relaxed);
        });
        assert!(!event.wait_until(&shutdown));
        stopper.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let ns = namespace("event_timeout");
        let event = NamedEvent::create(&ns, "Late", false).unwrap();
        assert!(!event.wait_timeout(Duration::from_millis(2)));
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(2)));
    }
}
