//! Transaction-id allocation for request/response correlation.
//!
//! # What is a transaction id? (for beginners)
//!
//! The device answers requests asynchronously.  To know which answer belongs
//! to which request, every outbound message carries a one-byte *transaction
//! id* in its header, and the device echoes that byte back in its reply.
//!
//! The id space is tiny: 1 to 255.  Id 0 is never used because the device
//! ignores it.  After 255 the counter wraps back to 1.
//!
//! # Thread safety
//!
//! The counter stores the last issued id in an `AtomicU8` and advances it with
//! a compare-and-swap loop, so concurrent callers never receive the same id
//! from the same turn of the counter.

use std::sync::atomic::{AtomicU8, Ordering};

/// Highest transaction id; the counter wraps from here back to 1.
pub const MAX_TRANSACTION_ID: u8 = 0xff;

/// Lock-free allocator for transaction ids in `1..=255`.
///
/// # Examples
///
/// ```rust
/// use loupedeck_core::protocol::TransactionCounter;
///
/// let counter = TransactionCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct TransactionCounter {
    /// Last id handed out; 0 means "nothing issued yet".
    last: AtomicU8,
}

impl TransactionCounter {
    /// Creates a counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            last: AtomicU8::new(0),
        }
    }

    /// Returns the next id, wrapping 255 → 1 and never yielding 0.
    pub fn next(&self) -> u8 {
        let previous = self
            .last
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(successor(id))
            })
            .unwrap_or_else(|id| id);
        successor(previous)
    }

    /// Returns the next id for which `in_use` is false.
    ///
    /// Returns `None` once every id in `1..=255` has been tried and all of them
    /// are in use.
    pub fn next_free(&self, mut in_use: impl FnMut(u8) -> bool) -> Option<u8> {
        (0..MAX_TRANSACTION_ID)
            .map(|_| self.next())
            .find(|&id| !in_use(id))
    }

    /// Returns the most recently issued id (0 before the first call).
    pub fn current(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for TransactionCounter {
    fn default() -> Self {
        Self::new()
    }
}

fn successor(id: u8) -> u8 {
    if id == MAX_TRANSACTION_ID {
        1
    } else {
        id + 1
    }
}
