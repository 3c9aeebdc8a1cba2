//! Assembles a running balancer from a [`SmartConfig`].
//!
//! [`LoadBalancerFactory::build`] validates the configuration, creates the
//! host set and selector, and spawns the health-check poller on the current
//! tokio runtime. The returned [`SmartLoadBalancer`] owns the poller task
//! and stops it on [`SmartLoadBalancer::shutdown`] or drop.

use crate::balancer::algorithms::selector_for;
use crate::balancer::{LoadBalancer, LoadBalancerError, MembershipChange};
use crate::config::{SmartConfig, validate_config};
use crate::health::{HealthCheckClient, HealthCheckPoller, HealthProbe, PollerConfig};
use crate::host::{Host, HostStats};
use crate::metrics::MetricsCollector;
use crate::util::ShutdownSignal;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors that can occur while building a balancer.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Balancer(#[from] LoadBalancerError),

    #[error("health checking requires a running tokio runtime")]
    NoRuntime,
}

/// Builds [`SmartLoadBalancer`]s.
pub struct LoadBalancerFactory {
    config: SmartConfig,
    metrics: Option<MetricsCollector>,
}

impl LoadBalancerFactory {
    pub fn new(config: SmartConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Publish host stats and probe results to `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SmartConfig {
        &self.config
    }

    /// Build a balancer that pings hosts over HTTP.
    pub fn build(self) -> Result<SmartLoadBalancer, FactoryError> {
        let probe = HealthCheckClient::new(&self.config.health_check);
        self.build_with_probe(probe)
    }

    /// Build a balancer that checks health through `probe`.
    ///
    /// The probe is unused when health checking is disabled.
    pub fn build_with_probe<P>(self, probe: P) -> Result<SmartLoadBalancer, FactoryError>
    where
        P: HealthProbe + 'static,
    {
        if self.config.hosts.is_empty() {
            return Err(LoadBalancerError::EmptyHostList.into());
        }
        validate_config(&self.config).map_err(FactoryError::InvalidConfig)?;

        let health = &self.config.health_check;
        // Resolve the runtime before anything is built.
        let runtime = if health.enabled {
            Some(Handle::try_current().map_err(|_| FactoryError::NoRuntime)?)
        } else {
            None
        };

        let balancer = Arc::new(LoadBalancer::with_selector(
            self.config.hosts.iter().cloned(),
            self.config.balancer.latency_window,
            selector_for(&self.config.balancer.algorithm),
        )?);

        if let Some(metrics) = &self.metrics {
            metrics.observe_hosts(&balancer.host_stats());
        }

        let shutdown = ShutdownSignal::new();
        let poller = runtime.map(|runtime| {
            let mut poller =
                HealthCheckPoller::new(Arc::clone(&balancer), probe, PollerConfig::from(health));
            if let Some(metrics) = &self.metrics {
                poller = poller.with_metrics(metrics.clone());
            }
            runtime.spawn(poller.run(shutdown.subscribe()))
        });

        info!(
            hosts = balancer.hosts().len(),
            strategy = balancer.strategy(),
            health_check = health.enabled,
            "smart load balancer started"
        );

        Ok(SmartLoadBalancer {
            balancer,
            metrics: self.metrics,
            shutdown,
            poller: Mutex::new(poller),
            grace: health.shutdown_grace,
        })
    }
}

/// A balancer plus its health-check poller.
pub struct SmartLoadBalancer {
    balancer: Arc<LoadBalancer>,
    metrics: Option<MetricsCollector>,
    shutdown: ShutdownSignal,
    poller: Mutex<Option<JoinHandle<()>>>,
    /// How long `shutdown` waits for the poller.
    grace: Duration,
}

impl SmartLoadBalancer {
    /// The underlying balancer.
    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    /// Pick the host the next call should use.
    pub fn select_host(&self) -> Result<Arc<Host>, LoadBalancerError> {
        self.balancer.select_host()
    }

    /// Stats for every host.
    pub fn host_stats(&self) -> Vec<HostStats> {
        self.balancer.host_stats()
    }

    /// Replace the endpoint list, keeping state for retained hosts.
    pub fn update_hosts<I, S>(&self, names: I) -> Result<MembershipChange, LoadBalancerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let change = self.balancer.update_hosts(names)?;
        if let Some(metrics) = &self.metrics {
            for name in &change.removed {
                metrics.forget_host(name);
            }
            metrics.observe_hosts(&self.balancer.host_stats());
        }
        Ok(change)
    }

    /// Whether the poller task is still running.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the poller, waiting up to the configured grace period.
    pub async fn shutdown(&self) {
        self.shutdown.shutdown();

        let handle = self.poller.lock().take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(())) => info!("health check poller stopped"),
            Ok(Err(e)) => warn!(error = %e, "health check poller task failed"),
            Err(_) => {
                warn!(grace = ?self.grace, "health check poller did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for SmartLoadBalancer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}
