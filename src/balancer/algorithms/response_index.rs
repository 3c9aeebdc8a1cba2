//! Latency-and-concurrency aware selection.

use super::HostSelector;
use crate::host::Host;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Picks the host expected to finish the next call soonest.
///
/// Each candidate costs `average latency * (open connections + 1)`. A host
/// with no completed calls is scored at the lowest average among the
/// candidates (1 ms when none has history), so new or quiet hosts get
/// traffic early but still pay for calls already in flight. Equal costs go
/// to the host picked least recently, which rotates evenly through
/// equivalent hosts.
pub struct ResponseIndex {
    /// Source of selection stamps.
    sequence: AtomicU64,
}

impl ResponseIndex {
    /// Create a new response-index selector.
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
        }
    }

    /// Ranking cost of a host; lower is better. `baseline` stands in for
    /// the average of a host with an empty latency window.
    pub fn cost(host: &Host, baseline: u64) -> u64 {
        host.response_queue_average()
            .unwrap_or(baseline)
            .saturating_mul(host.open_connections().saturating_add(1))
    }

    /// Lowest average latency among `candidates`, or 1 when none has one.
    pub fn baseline(candidates: &[&Arc<Host>]) -> u64 {
        candidates
            .iter()
            .filter_map(|host| host.response_queue_average())
            .min()
            .unwrap_or(1)
    }
}

impl Default for ResponseIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSelector for ResponseIndex {
    fn select<'a>(&self, candidates: &[&'a Arc<Host>]) -> Option<&'a Arc<Host>> {
        let baseline = Self::baseline(candidates);
        let mut best: Option<(&'a Arc<Host>, u64, u64)> = None;

        for &host in candidates {
            let cost = Self::cost(host, baseline);
            let stamp = host.last_selected();

            let better = match best {
                None => true,
                Some((_, best_cost, best_stamp)) => {
                    cost < best_cost || (cost == best_cost && stamp < best_stamp)
                }
            };
            if better {
                best = Some((host, cost, stamp));
            }
        }

        let (selected, _, _) = best?;
        let stamp = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        selected.mark_selected(stamp);
        Some(selected)
    }

    fn name(&self) -> &'static str {
        "response_index"
    }
}
