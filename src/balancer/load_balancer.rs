//! The call-path entry point: pick a host, report stats.

use crate::balancer::algorithms::{HostSelector, ResponseIndex};
use crate::balancer::{HostRegistry, MembershipChange};
use crate::host::{Host, HostStats};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors surfaced by host selection and membership updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadBalancerError {
    /// Every host is currently marked unhealthy.
    #[error("no available hosts: all {total} hosts are unhealthy")]
    NoAvailableHosts { total: usize },

    /// A balancer needs at least one host.
    #[error("host list cannot be empty")]
    EmptyHostList,
}

/// Routes calls to the host best able to serve them.
///
/// `select_host` reads a lock-free snapshot of the host set and never waits
/// on the health poller; the poller only flips per-host atomic flags and
/// publishes new snapshots.
pub struct LoadBalancer {
    /// Live host set.
    registry: HostRegistry,
    /// Ranking strategy.
    selector: Box<dyn HostSelector>,
}

impl LoadBalancer {
    /// Create a balancer over `hosts` using the response-index strategy.
    pub fn new<I, S>(hosts: I, window_size: usize) -> Result<Self, LoadBalancerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_selector(hosts, window_size, Box::new(ResponseIndex::new()))
    }

    /// Create a balancer with a custom selection strategy.
    pub fn with_selector<I, S>(
        hosts: I,
        window_size: usize,
        selector: Box<dyn HostSelector>,
    ) -> Result<Self, LoadBalancerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = HostRegistry::new(hosts, window_size);
        if registry.is_empty() {
            return Err(LoadBalancerError::EmptyHostList);
        }

        debug!(
            hosts = registry.len(),
            strategy = selector.name(),
            "load balancer created"
        );

        Ok(Self { registry, selector })
    }

    /// Pick the host the next call should use.
    ///
    /// Fails with [`LoadBalancerError::NoAvailableHosts`] when no host is
    /// healthy; the caller should treat that as a failed call.
    pub fn select_host(&self) -> Result<Arc<Host>, LoadBalancerError> {
        let hosts = self.registry.snapshot();
        let candidates: Vec<&Arc<Host>> = hosts.iter().filter(|h| h.is_healthy()).collect();

        match self.selector.select(&candidates) {
            Some(host) => {
                trace!(host = %host.name(), "selected host");
                Ok(Arc::clone(host))
            }
            None => {
                warn!(hosts = hosts.len(), "no healthy hosts available");
                Err(LoadBalancerError::NoAvailableHosts { total: hosts.len() })
            }
        }
    }

    /// Stats for every host, healthy or not.
    pub fn host_stats(&self) -> Vec<HostStats> {
        self.registry
            .snapshot()
            .iter()
            .map(|host| host.snapshot())
            .collect()
    }

    /// Current host set.
    pub fn hosts(&self) -> Arc<Vec<Arc<Host>>> {
        self.registry.hosts()
    }

    /// Look up a host by name.
    pub fn host(&self, name: &str) -> Option<Arc<Host>> {
        self.registry.get(name)
    }

    /// Number of hosts currently marked healthy.
    pub fn healthy_count(&self) -> usize {
        self.registry
            .snapshot()
            .iter()
            .filter(|h| h.is_healthy())
            .count()
    }

    /// Name of the active selection strategy.
    pub fn strategy(&self) -> &'static str {
        self.selector.name()
    }

    /// Whether `name` is part of the configured host list.
    pub fn is_seed(&self, name: &str) -> bool {
        self.registry.is_seed(name)
    }

    /// Add hosts discovered at runtime.
    pub fn add_hosts<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.add(names)
    }

    /// Remove hosts that left the cluster.
    pub fn remove_hosts(&self, names: &[String]) -> Vec<String> {
        self.registry.remove(names)
    }

    /// Replace the host set with a new endpoint list.
    ///
    /// An empty list is rejected and the current set kept.
    pub fn update_hosts<I, S>(&self, names: I) -> Result<MembershipChange, LoadBalancerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(LoadBalancerError::EmptyHostList);
        }
        Ok(self.registry.replace(names))
    }
}
