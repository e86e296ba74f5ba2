//! Configuration file watcher for hot reload.
//!
//! # Responsibilities
//! - Reload and validate the file when it changes
//! - Forward accepted configurations to the poll loop
//! - Warn about edits that only take effect after a restart
//!
//! # Design Decisions
//! - The poll loop takes over bus, bridge, route and device settings;
//!   listener, transport and observability settings are bound at startup

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Settings in `new` that differ from `old` but are only read at startup.
pub fn restart_required(old: &GatewayConfig, new: &GatewayConfig) -> Vec<&'static str> {
    let checks = [
        ("listener.bind_address", old.listener.bind_address != new.listener.bind_address),
        ("listener.queue_depth", old.listener.queue_depth != new.listener.queue_depth),
        ("listener.max_body_bytes", old.listener.max_body_bytes != new.listener.max_body_bytes),
        (
            "listener.request_timeout_secs",
            old.listener.request_timeout_secs != new.listener.request_timeout_secs,
        ),
        (
            "listener.body_read_wait_ms",
            old.listener.body_read_wait_ms != new.listener.body_read_wait_ms,
        ),
        ("bus.transport", old.bus.transport != new.bus.transport),
        (
            "observability.log_level",
            old.observability.log_level != new.observability.log_level,
        ),
        (
            "observability.metrics_enabled",
            old.observability.metrics_enabled != new.observability.metrics_enabled,
        ),
        (
            "observability.metrics_address",
            old.observability.metrics_address != new.observability.metrics_address,
        ),
    ];
    checks
        .into_iter()
        .filter(|(_, changed)| *changed)
        .map(|(field, _)| field)
        .collect()
}

/// Watches the configuration file and sends each valid revision.
pub struct ConfigWatcher {
    path: PathBuf,
    running: GatewayConfig,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Watch `path`; `running` is the configuration the process started with.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(
        path: &Path,
        running: GatewayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                running,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut running,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(new_config) => {
                            for field in restart_required(&running, &new_config) {
                                tracing::warn!(field, "Setting changed; takes effect after restart");
                            }
                            running = new_config.clone();
                            if update_tx.send(new_config).is_err() {
                                tracing::debug!("Poll loop gone, reload dropped");
                            }
                        }
                        Err(e) => tracing::error!(
                            error = %e,
                            "Failed to reload config, keeping current configuration"
                        ),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}
