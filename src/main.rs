//! Adaptive request defense gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                    DEFENSE GATEWAY                        │
//!                     │                                                           │
//!   Client Request    │  ┌──────────┐   ┌────────────┐   ┌──────────────┐         │
//!   ──────────────────┼─▶│  http    │──▶│    gate    │──▶│ defense      │         │
//!                     │  │ server   │   │ (scorer,   │   │ login guard  │         │
//!                     │  └──────────┘   │  csrf, ip) │   └──────┬───────┘         │
//!                     │                 └─────┬──────┘          │                 │
//!                     │                       │ 403 JSON        ▼                 │
//!   Client Response   │                       │          ┌──────────────┐         │
//!   ◀─────────────────┼───────────────────────┴──────────│ http proxy   │◀────────┼── Upstream
//!                     │                                  └──────────────┘         │    App
//!                     │  ┌─────────────────────────────────────────────────────┐ │
//!                     │  │  store (counters, TTLs) · config · observability    │ │
//!                     │  │  admin API · lifecycle                              │ │
//!                     │  └─────────────────────────────────────────────────────┘ │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use request_defense::admin::setup_admin_router;
use request_defense::config::{load_config, watcher::ConfigWatcher, GateConfig};
use request_defense::lifecycle::{wait_for_signal, Shutdown};
use request_defense::observability::{logging, metrics};
use request_defense::HttpServer;

#[derive(Parser)]
#[command(name = "request-defense")]
#[command(about = "Request defense gateway", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-defense starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        max_suspicious_score = config.detection.max_suspicious_score,
        csrf_enabled = config.csrf.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must outlive the server for reloads to keep flowing.
    let (policy_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, config.clone());
            (updates, Some(watcher.run()?))
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (updates, None)
        }
    };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config.clone())?;

    if config.admin.enabled {
        let admin_app = setup_admin_router(server.admin_state());
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");

        let mut admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(admin_listener, admin_app)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, policy_updates, server_shutdown));

    wait_for_signal().await;
    shutdown.trigger();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
