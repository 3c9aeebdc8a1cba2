//! Round-robin selection.

use super::HostSelector;
use crate::host::Host;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cycles through the healthy hosts in order, ignoring their statistics.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// Create a new round-robin selector.
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSelector for RoundRobin {
    fn select<'a>(&self, candidates: &[&'a Arc<Host>]) -> Option<&'a Arc<Host>> {
        if candidates.is_empty() {
            return None;
        }

        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx])
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
