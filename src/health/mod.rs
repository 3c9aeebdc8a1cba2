//! Cluster health checking.
//!
//! [`HealthCheckClient`] pings a node and decodes its `PingList`;
//! [`HealthCheckPoller`] runs it against every host on an interval and
//! feeds the results back into the balancer.

mod client;
mod ping;
mod poller;

pub use client::{HealthCheckClient, HealthCheckError, HealthProbe};
pub use ping::{PingItem, PingParseError, PingResponse, PingStatus};
pub use poller::{HealthCheckPoller, PollSummary, PollerConfig};
