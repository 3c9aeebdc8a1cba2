//! Background health-check poller.
//!
//! Every interval the poller pings all current hosts at once, merges their
//! status reports, and applies the result to each host's health flag. It
//! only ever touches per-host atomics and the registry's copy-on-write
//! snapshot, so calls routed through the balancer never wait on a poll.

use crate::balancer::{LoadBalancer, MembershipChange};
use crate::config::HealthCheckConfig;
use crate::health::{HealthCheckError, HealthProbe, PingItem, PingResponse, PingStatus};
use crate::host::Host;
use crate::metrics::MetricsCollector;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Poll loop settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between poll cycles.
    pub interval: Duration,
    /// Consecutive missed pings before a host is marked unhealthy.
    pub failure_threshold: u32,
    /// Add hosts named in reports and drop non-seed hosts missing from them.
    pub discover_hosts: bool,
}

impl From<&HealthCheckConfig> for PollerConfig {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            interval: config.interval,
            failure_threshold: config.failure_threshold,
            discover_hosts: config.discover_hosts,
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Hosts pinged.
    pub probed: usize,
    /// Pings that failed outright.
    pub failed_probes: usize,
    /// Hosts that became unhealthy.
    pub marked_unhealthy: Vec<String>,
    /// Hosts that became healthy.
    pub marked_healthy: Vec<String>,
    /// Diagnostic text of hosts reported as `ERROR`, in host order.
    pub reported_errors: Vec<(String, String)>,
    /// Hosts added or removed by discovery.
    pub membership: MembershipChange,
}

/// Merged view of one node across all reports of a cycle.
#[derive(Debug, Clone, Copy)]
struct Reported<'a> {
    status: PingStatus,
    text: Option<&'a str>,
}

impl<'a> Reported<'a> {
    /// Fold in another reporter's item; an error replaces an ok.
    fn merge(&mut self, item: &'a PingItem) {
        if item.status.is_ok() {
            return;
        }
        if self.status.is_ok() || self.text.is_none() {
            self.text = item.text.as_deref();
        }
        self.status = PingStatus::Error;
    }
}

impl<'a> From<&'a PingItem> for Reported<'a> {
    fn from(item: &'a PingItem) -> Self {
        Self {
            status: item.status,
            text: item.text.as_deref(),
        }
    }
}

/// Drives a [`HealthProbe`] against the balancer's hosts.
pub struct HealthCheckPoller<P> {
    balancer: Arc<LoadBalancer>,
    probe: P,
    config: PollerConfig,
    metrics: Option<MetricsCollector>,
}

impl<P: HealthProbe> HealthCheckPoller<P> {
    pub fn new(balancer: Arc<LoadBalancer>, probe: P, config: PollerConfig) -> Self {
        Self {
            balancer,
            probe,
            config,
            metrics: None,
        }
    }

    /// Publish host stats and probe results to `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Poll on the configured interval until shutdown.
    ///
    /// A shutdown that arrives mid-cycle abandons the in-flight pings.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = ?self.config.interval,
            failure_threshold = self.config.failure_threshold,
            discover_hosts = self.config.discover_hosts,
            "health check poller starting"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        summary = self.poll_once() => {
                            debug!(
                                probed = summary.probed,
                                failed = summary.failed_probes,
                                "poll cycle complete"
                            );
                        }
                        _ = shutdown.recv() => {
                            info!("health check poller shutting down, abandoning in-flight pings");
                            break;
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("health check poller shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single poll cycle.
    pub async fn poll_once(&self) -> PollSummary {
        let hosts = self.balancer.hosts();

        let results = join_all(hosts.iter().map(|host| async move {
            let result = self.probe.probe(host.name()).await;
            (host, result)
        }))
        .await;

        self.apply(&hosts, results)
    }

    /// Fold ping results into host health and membership.
    fn apply(
        &self,
        hosts: &[Arc<Host>],
        results: Vec<(&Arc<Host>, Result<PingResponse, HealthCheckError>)>,
    ) -> PollSummary {
        let mut summary = PollSummary {
            probed: results.len(),
            ..PollSummary::default()
        };

        // Merge every report; when reporters disagree, error wins.
        let mut report: HashMap<&str, Reported<'_>> = HashMap::new();
        let mut failed: HashSet<&str> = HashSet::new();

        for (host, result) in &results {
            match result {
                Ok(response) => {
                    self.record_probe(host.name(), true);
                    for item in response.items() {
                        report
                            .entry(item.name.as_str())
                            .and_modify(|merged| merged.merge(item))
                            .or_insert_with(|| Reported::from(item));
                    }
                }
                Err(e) => {
                    warn!(host = %host.name(), error = %e, "health check failed");
                    self.record_probe(host.name(), false);
                    failed.insert(host.name());
                }
            }
        }
        summary.failed_probes = failed.len();
        let any_report = summary.failed_probes < summary.probed;

        let threshold = self.config.failure_threshold;
        let mut absent = Vec::new();

        for host in hosts {
            let name = host.name();
            // A host we could not reach counts a miss whatever its peers say.
            let reported = match report.get(name) {
                Some(reported) if !failed.contains(name) => reported,
                found => {
                    if found.is_none() {
                        debug!(host = %name, "host missing from ping reports");
                        absent.push(name.to_string());
                    }
                    if host.ping_failed(threshold) {
                        summary.marked_unhealthy.push(name.to_string());
                    }
                    continue;
                }
            };

            let ok = reported.status.is_ok();
            if let (false, Some(text)) = (ok, reported.text) {
                summary
                    .reported_errors
                    .push((name.to_string(), text.to_string()));
            }
            if host.ping_reported(ok, reported.text) {
                if ok {
                    summary.marked_healthy.push(name.to_string());
                } else {
                    summary.marked_unhealthy.push(name.to_string());
                }
            }
        }

        if self.config.discover_hosts && any_report {
            summary.membership = self.reconcile_membership(hosts, &report, absent);
        }

        if let Some(metrics) = &self.metrics {
            for name in &summary.membership.removed {
                metrics.forget_host(name);
            }
            metrics.observe_hosts(&self.balancer.host_stats());
        }

        summary
    }

    /// Add newly reported hosts and drop departed ones that weren't
    /// configured.
    fn reconcile_membership(
        &self,
        hosts: &[Arc<Host>],
        report: &HashMap<&str, Reported<'_>>,
        absent: Vec<String>,
    ) -> MembershipChange {
        let known: HashSet<&str> = hosts.iter().map(|h| h.name()).collect();

        let mut discovered: Vec<String> = report
            .keys()
            .filter(|name| !known.contains(*name))
            .map(|name| name.to_string())
            .collect();
        discovered.sort();

        let departed: Vec<String> = absent
            .into_iter()
            .filter(|name| !self.balancer.is_seed(name))
            .collect();

        let added = self.balancer.add_hosts(discovered);
        // A newly reported host may already be known to be down.
        for name in &added {
            let reported = report.get(name.as_str());
            if let (Some(host), Some(reported)) = (self.balancer.host(name), reported) {
                host.set_healthy(reported.status.is_ok());
            }
        }

        MembershipChange {
            added,
            removed: self.balancer.remove_hosts(&departed),
        }
    }

    fn record_probe(&self, host: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_probe(host, success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::future::Future;

    /// Probe answering from a script: `None` means the ping fails.
    #[derive(Default)]
    struct ScriptedProbe {
        replies: Mutex<HashMap<String, Option<Vec<PingItem>>>>,
    }

    impl ScriptedProbe {
        fn reply(&self, host: &str, items: &[(&str, PingStatus)]) {
            let items = items
                .iter()
                .map(|(name, status)| PingItem::new(*name, *status))
                .collect();
            self.reply_items(host, items);
        }

        fn reply_items(&self, host: &str, items: Vec<PingItem>) {
            self.replies.lock().insert(host.to_string(), Some(items));
        }

        fn fail(&self, host: &str) {
            self.replies.lock().insert(host.to_string(), None);
        }
    }

    impl HealthProbe for Arc<ScriptedProbe> {
        fn probe(
            &self,
            host: &str,
        ) -> impl Future<Output = Result<PingResponse, HealthCheckError>> + Send {
            let reply = self.replies.lock().get(host).cloned().flatten();
            async move {
                match reply {
                    Some(items) => Ok(PingResponse::new(items)),
                    None => Err(HealthCheckError::Timeout(Duration::ZERO)),
                }
            }
        }
    }

    fn setup(
        hosts: &[&str],
        threshold: u32,
        discover: bool,
    ) -> (Arc<LoadBalancer>, Arc<ScriptedProbe>, HealthCheckPoller<Arc<ScriptedProbe>>) {
        let balancer = Arc::new(LoadBalancer::new(hosts.iter().copied(), 5).unwrap());
        let probe = Arc::new(ScriptedProbe::default());
        let config = PollerConfig {
            interval: Duration::from_millis(10),
            failure_threshold: threshold,
            discover_hosts: discover,
        };
        let poller = HealthCheckPoller::new(Arc::clone(&balancer), Arc::clone(&probe), config);
        (balancer, probe, poller)
    }

    fn healthy(balancer: &LoadBalancer, name: &str) -> bool {
        balancer.host(name).unwrap().is_healthy()
    }

    #[tokio::test]
    async fn test_self_reports_keep_hosts_healthy() {
        let (balancer, probe, poller) = setup(&["a", "b"], 2, false);
        probe.reply("a", &[("a", PingStatus::Ok)]);
        probe.reply("b", &[("b", PingStatus::Ok)]);

        let summary = poller.poll_once().await;
        assert_eq!(summary.probed, 2);
        assert_eq!(summary.failed_probes, 0);
        assert!(healthy(&balancer, "a"));
        assert!(healthy(&balancer, "b"));
    }

    #[tokio::test]
    async fn test_failed_pings_debounce() {
        let (balancer, probe, poller) = setup(&["a", "b"], 3, false);
        probe.reply("a", &[("a", PingStatus::Ok)]);
        probe.fail("b");

        poller.poll_once().await;
        poller.poll_once().await;
        assert!(healthy(&balancer, "b"));

        let summary = poller.poll_once().await;
        assert!(!healthy(&balancer, "b"));
        assert_eq!(summary.marked_unhealthy, vec!["b"]);

        probe.reply("b", &[("b", PingStatus::Ok)]);
        let summary = poller.poll_once().await;
        assert!(healthy(&balancer, "b"));
        assert_eq!(summary.marked_healthy, vec!["b"]);
    }

    #[tokio::test]
    async fn test_error_status_marks_unhealthy_at_once() {
        let (balancer, probe, poller) = setup(&["a"], 3, false);
        probe.reply("a", &[("a", PingStatus::Error)]);

        poller.poll_once().await;
        assert!(!healthy(&balancer, "a"));
        assert_eq!(balancer.host("a").unwrap().consecutive_failed_pings(), 0);
    }

    #[tokio::test]
    async fn test_absent_host_counts_as_missed() {
        let (balancer, probe, poller) = setup(&["a", "b"], 1, false);
        // b answers, but only about a
        probe.reply("a", &[("a", PingStatus::Ok)]);
        probe.reply("b", &[("a", PingStatus::Ok)]);

        poller.poll_once().await;
        assert!(healthy(&balancer, "a"));
        assert!(!healthy(&balancer, "b"));
    }

    #[tokio::test]
    async fn test_error_wins_between_reporters() {
        let (balancer, probe, poller) = setup(&["a", "b"], 3, false);
        probe.reply("a", &[("a", PingStatus::Ok), ("b", PingStatus::Error)]);
        probe.reply("b", &[("a", PingStatus::Ok), ("b", PingStatus::Ok)]);

        poller.poll_once().await;
        assert!(healthy(&balancer, "a"));
        assert!(!healthy(&balancer, "b"));
    }

    #[tokio::test]
    async fn test_own_ping_failure_overrides_peer_report() {
        let (balancer, probe, poller) = setup(&["a", "b"], 1, false);
        probe.reply("a", &[("a", PingStatus::Ok), ("b", PingStatus::Ok)]);
        probe.fail("b");

        poller.poll_once().await;
        assert!(!healthy(&balancer, "b"));
    }

    #[tokio::test]
    async fn test_discovery_adds_and_removes_hosts() {
        let (balancer, probe, poller) = setup(&["a"], 3, true);
        probe.reply(
            "a",
            &[("a", PingStatus::Ok), ("b", PingStatus::Ok), ("c", PingStatus::Error)],
        );

        let summary = poller.poll_once().await;
        assert_eq!(summary.membership.added, vec!["b", "c"]);
        assert!(healthy(&balancer, "b"));
        assert!(!healthy(&balancer, "c"));

        // c leaves the cluster; b keeps answering
        probe.reply("a", &[("a", PingStatus::Ok), ("b", PingStatus::Ok)]);
        probe.reply("b", &[("b", PingStatus::Ok)]);
        probe.reply("c", &[]);

        let summary = poller.poll_once().await;
        assert_eq!(summary.membership.removed, vec!["c"]);
        assert!(balancer.host("c").is_none());
    }

    #[tokio::test]
    async fn test_discovery_removes_host_that_stops_answering() {
        let (balancer, probe, poller) = setup(&["a"], 3, true);
        probe.reply("a", &[("a", PingStatus::Ok), ("b", PingStatus::Ok)]);
        probe.reply("b", &[("b", PingStatus::Ok)]);

        let summary = poller.poll_once().await;
        assert_eq!(summary.membership.added, vec!["b"]);

        // b is gone: nobody names it and it no longer answers
        probe.reply("a", &[("a", PingStatus::Ok)]);
        probe.fail("b");

        let summary = poller.poll_once().await;
        assert_eq!(summary.failed_probes, 1);
        assert_eq!(summary.membership.removed, vec!["b"]);
        assert!(balancer.host("b").is_none());
        assert!(healthy(&balancer, "a"));
    }

    #[tokio::test]
    async fn test_unreachable_host_named_by_peer_is_kept() {
        let (balancer, probe, poller) = setup(&["a"], 3, true);
        balancer.add_hosts(["b"]);
        probe.reply("a", &[("a", PingStatus::Ok), ("b", PingStatus::Ok)]);
        probe.fail("b");

        let summary = poller.poll_once().await;
        assert!(summary.membership.removed.is_empty());
        assert_eq!(balancer.host("b").unwrap().consecutive_failed_pings(), 1);
    }

    #[tokio::test]
    async fn test_error_text_is_kept() {
        let (balancer, probe, poller) = setup(&["a", "b"], 3, false);
        probe.reply("a", &[("a", PingStatus::Ok), ("b", PingStatus::Ok)]);
        probe.reply_items(
            "b",
            vec![PingItem::new("b", PingStatus::Error).with_text("disk full")],
        );

        let summary = poller.poll_once().await;
        assert!(!healthy(&balancer, "b"));
        assert_eq!(summary.marked_unhealthy, vec!["b"]);
        assert_eq!(
            summary.reported_errors,
            vec![("b".to_string(), "disk full".to_string())]
        );
    }

    #[tokio::test]
    async fn test_discovery_never_removes_seeds() {
        let (balancer, probe, poller) = setup(&["a", "b"], 3, true);
        probe.reply("a", &[("a", PingStatus::Ok)]);
        probe.reply("b", &[("a", PingStatus::Ok)]);

        let summary = poller.poll_once().await;
        assert!(summary.membership.removed.is_empty());
        assert!(balancer.host("b").is_some());
    }

    #[tokio::test]
    async fn test_discovery_skipped_when_every_ping_fails() {
        let (balancer, probe, poller) = setup(&["a"], 3, true);
        balancer.add_hosts(["x"]);
        probe.fail("a");
        probe.fail("x");

        let summary = poller.poll_once().await;
        assert!(summary.membership.is_empty());
        assert!(balancer.host("x").is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (balancer, probe, poller) = setup(&["a"], 1, false);
        probe.fail("a");

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(poller.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!healthy(&balancer, "a"));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_metrics_updated_after_cycle() {
        let (_balancer, probe, poller) = setup(&["a"], 3, false);
        let metrics = MetricsCollector::new();
        let poller = poller.with_metrics(metrics.clone());
        probe.reply("a", &[("a", PingStatus::Ok)]);

        poller.poll_once().await;

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, metrics.registry()).unwrap();
        assert!(buffer.contains("smartlb_health_probes_total"));
        assert!(buffer.contains("smartlb_host_health{host=\"a\"} 1"));
    }
}
