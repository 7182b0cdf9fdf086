//! # Identifier Allocator
//!
//! Every resource that crosses the process boundary is named by a `u64`
//! from this allocator, never by an address.
//!
//! `0` is `UNASSIGNED_ID` and is never handed out.

use std::sync::atomic::{AtomicU64, Ordering};

use raybridge_shared::UNASSIGNED_ID;

/// The process-wide allocator.
static GLOBAL: IdAllocator = IdAllocator::new();

/// Monotonically increasing identifier source.
///
/// Lock-free; safe to call from any thread.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Creates an allocator whose first identifier is `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(UNASSIGNED_ID + 1),
        }
    }

    /// The process-wide instance.
    #[inline]
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Returns an identifier greater than every one returned before.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        debug_assert_ne!(id, UNASSIGNED_ID, "identifier space exhausted");
        id
    }

    /// The identifier the next call will return.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for `IdAllocator::global().next()`.
#[inline]
pub fn next_id() -> u64 {
    GLOBAL.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_after_sentinel() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.peek(), 3);
    }

    #[test]
    fn test_unique_across_threads() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    let mut taken: Vec<u64> = (0..1000).map(|_| ids.next()).collect();
                    // Each thread sees its own values strictly increasing
                    assert!(taken.windows(2).all(|pair| pair[0] < pair[1]));
                    taken.sort_unstable();
                    taken
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
        assert!(!all.contains(&UNASSIGNED_ID));
    }

    #[test]
    fn test_global_never_returns_zero() {
        assert_ne!(next_id(), UNASSIGNED_ID);
        let a = IdAllocator::global().next();
        let b = IdAllocator::global().next();
        assert!(b > a);
    }
}
