//! Configuration data types.

use crate::host::DEFAULT_LATENCY_WINDOW;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration: the endpoint list plus balancer and poller options.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmartConfig {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Cluster node identities to balance across
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Host selection settings
    #[serde(default)]
    pub balancer: BalancerConfig,

    /// Health-check poller settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

impl SmartConfig {
    /// Default configuration for the given endpoints.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            global: GlobalConfig::default(),
            hosts: hosts.into_iter().map(Into::into).collect(),
            balancer: BalancerConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.health_check.interval = interval;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.health_check.failure_threshold = threshold;
        self
    }

    pub fn with_latency_window(mut self, size: usize) -> Self {
        self.balancer.latency_window = size;
        self
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check.path = path.into();
        self
    }

    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check.enabled = enabled;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.balancer.algorithm = algorithm;
        self
    }

    pub fn with_host_discovery(mut self, enabled: bool) -> Self {
        self.health_check.discover_hosts = enabled;
        self
    }
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Host selection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Ranking strategy
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Number of recent call durations averaged per host
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            latency_window: default_latency_window(),
        }
    }
}

/// Host selection strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Lowest `average latency * (open connections + 1)`
    #[default]
    ResponseIndex,
    RoundRobin,
}

/// Health-check poller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Whether the poller runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// URI scheme for ping requests
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Port appended to each host identity (when it has none)
    #[serde(default)]
    pub port: Option<u16>,

    /// Ping path, including any query string
    #[serde(default = "default_health_path")]
    pub path: String,

    /// How often to poll
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Timeout for a single ping
    #[serde(default = "default_ping_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive missed pings before a host is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Add and remove hosts based on ping reports
    #[serde(default)]
    pub discover_hosts: bool,

    /// How long shutdown waits for an in-flight poll
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scheme: default_scheme(),
            port: None,
            path: default_health_path(),
            interval: default_poll_interval(),
            timeout: default_ping_timeout(),
            failure_threshold: default_failure_threshold(),
            discover_hosts: false,
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_latency_window() -> usize {
    DEFAULT_LATENCY_WINDOW
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_health_path() -> String {
    "/?ping".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

/// Serde adapter for humantime durations ("10s", "500ms").
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SmartConfig::new(["10.0.0.1", "10.0.0.2"]);

        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.balancer.algorithm, Algorithm::ResponseIndex);
        assert_eq!(config.balancer.latency_window, DEFAULT_LATENCY_WINDOW);
        assert_eq!(config.health_check.failure_threshold, 3);
        assert_eq!(config.health_check.path, "/?ping");
    }

    #[test]
    fn test_builders() {
        let config = SmartConfig::new(["a"])
            .with_poll_interval(Duration::from_millis(250))
            .with_failure_threshold(2)
            .with_latency_window(4)
            .with_health_check_path("/ping")
            .with_health_check(false)
            .with_host_discovery(true);

        assert_eq!(config.health_check.interval, Duration::from_millis(250));
        assert_eq!(config.health_check.failure_threshold, 2);
        assert_eq!(config.balancer.latency_window, 4);
        assert_eq!(config.health_check.path, "/ping");
        assert!(!config.health_check.enabled);
        assert!(config.health_check.discover_hosts);
    }

    #[test]
    fn test_algorithm_serde() {
        let algo: Algorithm = serde_yaml::from_str("response_index").unwrap();
        assert_eq!(algo, Algorithm::ResponseIndex);

        let algo: Algorithm = serde_yaml::from_str("round_robin").unwrap();
        assert_eq!(algo, Algorithm::RoundRobin);
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = "interval: 250ms\ntimeout: 2s\n";
        let config: HealthCheckConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }
}
