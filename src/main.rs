//! smartlb - health-checked host selection for a storage cluster
//!
//! Usage:
//!     smartlb --config <path>
//!
//! Runs the balancer and its health poller, exposes metrics, reloads the
//! host list when the config file changes, and logs host stats until
//! Ctrl+C. See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use smartlb::config::{ConfigWatcher, SmartConfig, load_config};
use smartlb::metrics::{MetricsCollector, MetricsServer};
use smartlb::util::{ShutdownSignal, init_logging};
use smartlb::{LoadBalancerFactory, SmartLoadBalancer};

/// Client-side load balancer for storage-cluster nodes.
#[derive(Parser, Debug)]
#[command(name = "smartlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// How often to log host stats
    #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = humantime::parse_duration)]
    stats_interval: Duration,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    anyhow::ensure!(
        !cli.stats_interval.is_zero(),
        "--stats-interval must be greater than zero"
    );

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);
    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    if cli.validate {
        info!("configuration is valid");
        print_summary(&config);
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        hosts = config.hosts.len(),
        algorithm = ?config.balancer.algorithm,
        "smartlb starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(cli, config))
}

fn print_summary(config: &SmartConfig) {
    let health = &config.health_check;
    println!("Configuration is valid.");
    println!("  Algorithm: {:?}", config.balancer.algorithm);
    println!("  Latency window: {}", config.balancer.latency_window);
    if health.enabled {
        println!(
            "  Health check: {}://<host>{} every {:?} (threshold {}, discovery {})",
            health.scheme,
            health.path,
            health.interval,
            health.failure_threshold,
            if health.discover_hosts { "on" } else { "off" }
        );
    } else {
        println!("  Health check: disabled");
    }
    println!("  Hosts: {}", config.hosts.len());
    for host in &config.hosts {
        println!("    - {}", host);
    }
}

async fn run(cli: Cli, config: SmartConfig) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();
    let metrics_config = config.global.metrics.clone();

    let lb = Arc::new(
        LoadBalancerFactory::new(config)
            .with_metrics(metrics.clone())
            .build()
            .context("failed to build load balancer")?,
    );

    let mut handles = Vec::new();

    if metrics_config.enabled {
        let server = MetricsServer::new(
            metrics_config.address,
            metrics_config.path,
            metrics,
            Arc::clone(lb.balancer()),
        );
        handles.push(tokio::spawn(server.run(shutdown.subscribe())));
    }

    let reload_target = Arc::clone(&lb);
    let watcher = ConfigWatcher::new(
        cli.config.clone(),
        Box::new(move |config| match reload_target.update_hosts(config.hosts) {
            Ok(change) if change.is_empty() => info!("host list unchanged"),
            Ok(change) => info!(
                added = ?change.added,
                removed = ?change.removed,
                "host list updated"
            ),
            Err(e) => warn!(error = %e, "rejected host list update"),
        }),
    );
    handles.push(tokio::spawn(watcher.run(shutdown.subscribe())));

    handles.push(tokio::spawn(log_stats(
        Arc::clone(&lb),
        cli.stats_interval,
        shutdown.subscribe(),
    )));

    info!("smartlb is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    shutdown.shutdown();
    lb.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }

    info!("smartlb shut down complete");
    Ok(())
}

/// Periodically log every host's stats.
async fn log_stats(
    lb: Arc<SmartLoadBalancer>,
    period: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let balancer = lb.balancer();
                info!(
                    healthy = balancer.healthy_count(),
                    total = balancer.hosts().len(),
                    "host availability"
                );
                for stats in lb.host_stats() {
                    info!(
                        host = %stats.host,
                        healthy = stats.healthy,
                        total = stats.total_connections,
                        open = stats.open_connections,
                        avg_ms = stats.response_queue_average,
                        errors = stats.error_count,
                        "host stats"
                    );
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
