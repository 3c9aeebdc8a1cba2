//! Metrics collector using prometheus-client.
//!
//! Mirrors per-host statistics into gauges and counts health probes. The
//! collector is only written by the health poller, never by the call path.

use crate::host::HostStats;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Labels for per-host gauges.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HostLabels {
    pub host: String,
}

/// Labels for health probe counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    pub host: String,
    pub result: ProbeResult,
}

/// Result of a health probe.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ProbeResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Calls currently in flight per host.
    open_connections: Family<HostLabels, Gauge>,
    /// Calls ever started per host.
    connections: Family<HostLabels, Gauge>,
    /// Failed calls per host.
    errors: Family<HostLabels, Gauge>,
    /// Moving average of recent call durations.
    response_average_ms: Family<HostLabels, Gauge>,
    /// Health flag (1 = healthy, 0 = unhealthy).
    health: Family<HostLabels, Gauge>,
    /// Number of hosts in the balancer.
    hosts: Gauge,
    /// Health probe outcomes.
    probes: Family<ProbeLabels, Counter>,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let open_connections = Family::<HostLabels, Gauge>::default();
        let connections = Family::<HostLabels, Gauge>::default();
        let errors = Family::<HostLabels, Gauge>::default();
        let response_average_ms = Family::<HostLabels, Gauge>::default();
        let health = Family::<HostLabels, Gauge>::default();
        let hosts = Gauge::default();
        let probes = Family::<ProbeLabels, Counter>::default();

        registry.register(
            "smartlb_host_open_connections",
            "Calls currently in flight to the host",
            open_connections.clone(),
        );
        registry.register(
            "smartlb_host_connections",
            "Total calls started against the host",
            connections.clone(),
        );
        registry.register(
            "smartlb_host_errors",
            "Total failed calls against the host",
            errors.clone(),
        );
        registry.register(
            "smartlb_host_response_average_milliseconds",
            "Average duration of the host's recent calls",
            response_average_ms.clone(),
        );
        registry.register(
            "smartlb_host_health",
            "Host health status (1=healthy, 0=unhealthy)",
            health.clone(),
        );
        registry.register(
            "smartlb_hosts",
            "Number of hosts known to the balancer",
            hosts.clone(),
        );
        registry.register(
            "smartlb_health_probes",
            "Total number of health probes sent",
            probes.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                open_connections,
                connections,
                errors,
                response_average_ms,
                health,
                hosts,
                probes,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Copy a full set of host snapshots into the gauges.
    pub fn observe_hosts(&self, stats: &[HostStats]) {
        let inner = &self.inner;
        for s in stats {
            let labels = HostLabels {
                host: s.host.clone(),
            };
            inner
                .open_connections
                .get_or_create(&labels)
                .set(s.open_connections as i64);
            inner
                .connections
                .get_or_create(&labels)
                .set(s.total_connections as i64);
            inner.errors.get_or_create(&labels).set(s.error_count as i64);
            inner
                .response_average_ms
                .get_or_create(&labels)
                .set(s.response_queue_average as i64);
            inner
                .health
                .get_or_create(&labels)
                .set(if s.healthy { 1 } else { 0 });
        }
        inner.hosts.set(stats.len() as i64);
    }

    /// Record a health probe result.
    pub fn record_probe(&self, host: &str, success: bool) {
        let labels = ProbeLabels {
            host: host.to_string(),
            result: if success {
                ProbeResult::Success
            } else {
                ProbeResult::Failure
            },
        };
        self.inner.probes.get_or_create(&labels).inc();
    }

    /// Drop every series of a host that left the balancer.
    pub fn forget_host(&self, host: &str) {
        let inner = &self.inner;
        let labels = HostLabels {
            host: host.to_string(),
        };
        inner.open_connections.remove(&labels);
        inner.connections.remove(&labels);
        inner.errors.remove(&labels);
        inner.response_average_ms.remove(&labels);
        inner.health.remove(&labels);

        for result in [ProbeResult::Success, ProbeResult::Failure] {
            inner.probes.remove(&ProbeLabels {
                host: host.to_string(),
                result,
            });
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
