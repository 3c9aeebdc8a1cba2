//! Per-node call statistics.
//!
//! A [`Host`] is shared by every caller routing through the balancer, so all
//! of its counters are plain atomics and none of its operations take a lock.

mod state;
mod stats;
mod window;

pub use state::{Host, HostError};
pub use stats::HostStats;
pub use window::LatencyWindow;

/// Default number of call durations kept per host.
pub const DEFAULT_LATENCY_WINDOW: usize = 10;
