//! Mutable per-host state.

use crate::host::{HostStats, LatencyWindow};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};

/// Misuse of the host call-tracking API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// `connection_closed` was called more often than `connection_opened`.
    #[error("connection closed on host '{host}' with no open connections")]
    ConnectionUnderflow { host: String },
}

/// One cluster node the balancer can route calls to.
///
/// Callers drive the call counters (`connection_opened`, `call_complete`,
/// `connection_closed`); the health poller drives the health fields.
pub struct Host {
    /// Address or name identifying the node.
    name: String,
    /// Calls currently in flight.
    open_connections: AtomicU64,
    /// Calls ever opened.
    total_connections: AtomicU64,
    /// Calls reported as failed.
    error_count: AtomicU64,
    /// Recent call durations.
    latencies: LatencyWindow,
    /// Whether the host may be selected.
    healthy: AtomicBool,
    /// Pings missed since the last successful report.
    consecutive_failed_pings: AtomicU32,
    /// Selection sequence number of the last time this host was picked.
    last_selected: AtomicU64,
}

impl Host {
    /// Create a healthy host with an empty latency window of `window_size`.
    pub fn new(name: impl Into<String>, window_size: usize) -> Self {
        Self {
            name: name.into(),
            open_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            latencies: LatencyWindow::new(window_size),
            healthy: AtomicBool::new(true),
            consecutive_failed_pings: AtomicU32::new(0),
            last_selected: AtomicU64::new(0),
        }
    }

    /// Host identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record the start of a call against this host.
    pub fn connection_opened(&self) {
        self.open_connections.fetch_add(1, Ordering::AcqRel);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a call against this host.
    ///
    /// Closing with no open connections is a caller bug: the counter stays
    /// at zero and [`HostError::ConnectionUnderflow`] is returned.
    pub fn connection_closed(&self) -> Result<(), HostError> {
        self.open_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                open.checked_sub(1)
            })
            .map(|_| ())
            .map_err(|_| {
                error!(host = %self.name, "connection closed more times than opened");
                HostError::ConnectionUnderflow {
                    host: self.name.clone(),
                }
            })
    }

    /// Report a finished call's duration and outcome.
    pub fn call_complete(&self, duration_millis: u64, is_error: bool) {
        self.latencies.record(duration_millis);
        if is_error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn open_connections(&self) -> u64 {
        self.open_connections.load(Ordering::Acquire)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Mean of the latency window, `None` until a call completes.
    pub fn response_queue_average(&self) -> Option<u64> {
        self.latencies.average()
    }

    /// Whether this host may be selected.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Force the health flag, resetting the missed-ping count.
    pub fn set_healthy(&self, healthy: bool) {
        self.consecutive_failed_pings.store(0, Ordering::Release);
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn consecutive_failed_pings(&self) -> u32 {
        self.consecutive_failed_pings.load(Ordering::Acquire)
    }

    /// Apply a ping report naming this host. `reason` is the node's
    /// diagnostic text, if it sent one.
    ///
    /// Returns `true` when the health flag changed.
    pub fn ping_reported(&self, ok: bool, reason: Option<&str>) -> bool {
        self.consecutive_failed_pings.store(0, Ordering::Release);
        let was_healthy = self.healthy.swap(ok, Ordering::AcqRel);

        if was_healthy != ok {
            if ok {
                info!(host = %self.name, "host reported ok, marked healthy");
            } else {
                warn!(
                    host = %self.name,
                    reason = reason.unwrap_or("none given"),
                    "host reported error, marked unhealthy"
                );
            }
        }
        was_healthy != ok
    }

    /// Count a missed ping; at `threshold` consecutive misses the host
    /// becomes unhealthy.
    ///
    /// Returns `true` when this miss flipped the host to unhealthy.
    pub fn ping_failed(&self, threshold: u32) -> bool {
        let failures = self.consecutive_failed_pings.fetch_add(1, Ordering::AcqRel) + 1;
        if failures < threshold.max(1) {
            return false;
        }

        let flipped = self.healthy.swap(false, Ordering::AcqRel);
        if flipped {
            warn!(host = %self.name, failures, "host marked unhealthy after missed pings");
        }
        flipped
    }

    /// Selection sequence number stamped by the last pick.
    pub fn last_selected(&self) -> u64 {
        self.last_selected.load(Ordering::Relaxed)
    }

    /// Stamp this host as picked at `sequence`.
    pub fn mark_selected(&self, sequence: u64) {
        self.last_selected.store(sequence, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> HostStats {
        HostStats {
            host: self.name.clone(),
            total_connections: self.total_connections(),
            open_connections: self.open_connections(),
            response_queue_average: self.response_queue_average().unwrap_or(0),
            error_count: self.error_count(),
            healthy: self.is_healthy(),
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("open_connections", &self.open_connections())
            .field("total_connections", &self.total_connections())
            .field("healthy", &self.is_healthy())
            .field("latency_samples", &self.latencies.len())
            .field("latency_window", &self.latencies.capacity())
            .finish()
    }
}
