//! Configuration validation.

use crate::config::SmartConfig;
use std::collections::HashSet;
use std::time::Duration;

/// Validate the configuration.
///
/// Checks for:
/// - At least one host, none blank, no duplicates
/// - A latency window of at least one entry
/// - A usable poller setup (positive interval and timeout, threshold >= 1,
///   http scheme, absolute ping path)
/// - A known log level
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &SmartConfig) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.hosts.is_empty() {
        errors.push("at least one host must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for host in &config.hosts {
        if host.trim().is_empty() {
            errors.push("host name cannot be empty".to_string());
        } else if !seen.insert(host.as_str()) {
            errors.push(format!("duplicate host: {}", host));
        }
    }

    if config.balancer.latency_window == 0 {
        errors.push("latency_window must be >= 1".to_string());
    }

    let hc = &config.health_check;
    if hc.enabled {
        if hc.interval == Duration::ZERO {
            errors.push("health check interval must be greater than zero".to_string());
        }

        if hc.timeout == Duration::ZERO {
            errors.push("health check timeout must be greater than zero".to_string());
        }

        if hc.failure_threshold == 0 {
            errors.push("failure_threshold must be >= 1".to_string());
        }

        if hc.scheme != "http" {
            errors.push(format!(
                "unsupported health check scheme '{}', only http is supported",
                hc.scheme
            ));
        }

        if !hc.path.starts_with('/') {
            errors.push(format!(
                "health check path '{}' must start with '/'",
                hc.path
            ));
        }
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
