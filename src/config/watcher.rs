//! Endpoint list reloading.
//!
//! Watches the configuration file (and SIGHUP on unix) and hands each valid
//! new configuration to a callback, which typically swaps the balancer's
//! host set.

use crate::config::{SmartConfig, load_config};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Callback invoked with each successfully reloaded configuration.
pub type ReloadCallback = Box<dyn Fn(SmartConfig) + Send + Sync>;

/// Configuration file watcher.
pub struct ConfigWatcher {
    /// Path to the config file.
    config_path: PathBuf,
    /// Receives reloaded configs.
    on_reload: ReloadCallback,
}

impl ConfigWatcher {
    /// Create a new config watcher.
    pub fn new(config_path: PathBuf, on_reload: ReloadCallback) -> Self {
        Self {
            config_path,
            on_reload,
        }
    }

    /// Watch until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.config_path.display(), "config watcher starting");

        let (tx, rx) = mpsc::channel();
        let watcher: Result<RecommendedWatcher, _> = Watcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        );

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to create file watcher");
                let _ = shutdown.recv().await;
                return;
            }
        };

        // Editors often replace the file, so watch the directory.
        if let Some(parent) = self.config_path.parent() {
            if let Err(e) = watcher.watch(parent, RecursiveMode::NonRecursive) {
                error!(error = %e, "failed to watch config directory");
                let _ = shutdown.recv().await;
                return;
            }
        }

        #[cfg(unix)]
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "failed to set up SIGHUP handler");
                None
            }
        };

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let mut changed = false;
                    while let Ok(event) = rx.try_recv() {
                        changed |= self.should_reload(&event);
                    }
                    if changed {
                        self.try_reload();
                    }
                }

                _ = async {
                    #[cfg(unix)]
                    {
                        match sighup.as_mut() {
                            Some(sig) => sig.recv().await,
                            None => std::future::pending::<Option<()>>().await,
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    info!("received SIGHUP, reloading host list");
                    self.try_reload();
                }

                _ = shutdown.recv() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }

    /// Whether a file event concerns our config file's contents.
    fn should_reload(&self, event: &Event) -> bool {
        let ours = event
            .paths
            .iter()
            .any(|p| p.file_name() == self.config_path.file_name());

        ours && matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
    }

    /// Reload the file, keeping the current config on any error.
    fn try_reload(&self) {
        match load_config(&self.config_path) {
            Ok(config) => {
                info!(hosts = config.hosts.len(), "configuration reloaded");
                (self.on_reload)(config);
            }
            Err(e) => {
                error!(error = %e, "failed to reload configuration, keeping current hosts");
            }
        }
    }
}
