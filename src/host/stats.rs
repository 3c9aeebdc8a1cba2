//! Read-only host statistics.

use std::fmt;

/// Point-in-time copy of a [`Host`](crate::host::Host)'s counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStats {
    /// Host identity.
    pub host: String,
    /// Calls ever opened.
    pub total_connections: u64,
    /// Calls in flight when the snapshot was taken.
    pub open_connections: u64,
    /// Mean recent call duration in milliseconds (0 when no call completed).
    pub response_queue_average: u64,
    /// Calls reported as failed.
    pub error_count: u64,
    /// Whether the host was selectable.
    pub healthy: bool,
}

impl fmt::Display for HostStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] total={} open={} avg={}ms errors={}",
            self.host,
            if self.healthy { "healthy" } else { "unhealthy" },
            self.total_connections,
            self.open_connections,
            self.response_queue_average,
            self.error_count
        )
    }
}
