//! Bounded window of recent call durations.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Marker for a slot that has never been written.
const EMPTY: u64 = u64::MAX;

/// Lock-free FIFO of the last `capacity` call durations, in milliseconds.
///
/// Writers claim a slot with a single `fetch_add` on the cursor and store
/// into it, so the oldest entry is always the one overwritten. Readers scan
/// the slots without coordinating with writers and may see a window that is
/// one write behind, but every value they see was really recorded.
#[derive(Debug)]
pub struct LatencyWindow {
    slots: Box<[AtomicU64]>,
    cursor: AtomicUsize,
}

impl LatencyWindow {
    /// Create a window holding up to `capacity` durations (at least one).
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| AtomicU64::new(EMPTY))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Maximum number of durations kept.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Append a duration, evicting the oldest one when full.
    pub fn record(&self, millis: u64) {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        // EMPTY is reserved; clamp the (absurd) maximum duration below it.
        self.slots[idx].store(millis.min(EMPTY - 1), Ordering::Release);
    }

    /// Number of durations currently held.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Acquire) != EMPTY)
            .count()
    }

    /// Whether no duration has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arithmetic mean of the held durations, or `None` when empty.
    pub fn average(&self) -> Option<u64> {
        let (sum, count) = self
            .slots
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .filter(|&value| value != EMPTY)
            .fold((0u128, 0u128), |(sum, count), value| {
                (sum + u128::from(value), count + 1)
            });

        if count == 0 {
            None
        } else {
            Some((sum / count) as u64)
        }
    }
}
