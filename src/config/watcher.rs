//! Configuration file watcher for hot reload.
//!
//! Only the scoring and anti-forgery policy can change while running. The
//! watcher keeps the configuration the process is actually using, diffs each
//! reloaded file against it, and forwards a [`PolicyUpdate`] only when the
//! live part changed. Edits to anything else are reported as needing a
//! restart and are otherwise ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{CsrfConfig, DetectionConfig, GateConfig};

/// The part of a configuration that takes effect without a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyUpdate {
    pub detection: DetectionConfig,
    pub csrf: CsrfConfig,
}

impl PolicyUpdate {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            detection: config.detection.clone(),
            csrf: config.csrf.clone(),
        }
    }
}

/// Outcome of comparing a reloaded file with the running configuration.
#[derive(Debug, Default)]
struct ConfigDiff {
    update: Option<PolicyUpdate>,
    restart_required: Vec<&'static str>,
}

fn diff(running: &GateConfig, next: &GateConfig) -> ConfigDiff {
    let mut restart_required = Vec::new();
    let mut note = |section: &'static str, changed: bool| {
        if changed {
            restart_required.push(section);
        }
    };
    note("listener", running.listener != next.listener);
    note("upstream", running.upstream != next.upstream);
    note("timeouts", running.timeouts != next.timeouts);
    note("resilience", running.resilience != next.resilience);
    note("store", running.store != next.store);
    note("lockout", running.lockout != next.lockout);
    note("throttle", running.throttle != next.throttle);
    note("captcha", running.captcha != next.captcha);
    note("auth", running.auth != next.auth);
    note("observability", running.observability != next.observability);
    note("admin", running.admin != next.admin);
    // Issued tokens were stored with the old lifetime.
    note(
        "csrf.token_ttl_secs",
        running.csrf.token_ttl_secs != next.csrf.token_ttl_secs,
    );

    let mut live = PolicyUpdate::from_config(next);
    live.csrf.token_ttl_secs = running.csrf.token_ttl_secs;
    let update = (live != PolicyUpdate::from_config(running)).then_some(live);

    ConfigDiff {
        update,
        restart_required,
    }
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    running: GateConfig,
    update_tx: mpsc::UnboundedSender<PolicyUpdate>,
}

impl ConfigWatcher {
    /// Create a watcher for the file the process was started with.
    ///
    /// Returns the watcher and a receiver for live policy updates.
    pub fn new(
        path: &Path,
        running: GateConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PolicyUpdate>) {
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

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for events to keep flowing.
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
                    let next = match load_config(&path) {
                        Ok(next) => next,
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                "Failed to reload config, keeping current configuration"
                            );
                            return;
                        }
                    };

                    let changes = diff(&running, &next);
                    if !changes.restart_required.is_empty() {
                        tracing::warn!(
                            sections = ?changes.restart_required,
                            "Config changes ignored until restart"
                        );
                    }
                    match changes.update {
                        Some(update) => {
                            running.detection = update.detection.clone();
                            let ttl = running.csrf.token_ttl_secs;
                            running.csrf = update.csrf.clone();
                            running.csrf.token_ttl_secs = ttl;
                            tracing::info!(
                                max_suspicious_score = update.detection.max_suspicious_score,
                                csrf_enabled = update.csrf.enabled,
                                "Gate policy change detected"
                            );
                            if update_tx.send(update).is_err() {
                                tracing::warn!("Policy receiver gone, dropping update");
                            }
                        }
                        None => tracing::debug!("Config file changed, gate policy unchanged"),
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
