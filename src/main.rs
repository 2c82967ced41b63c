//! Chargelink notification server
//!
//! Serves the client-facing WebSocket endpoint and runs the log broadcaster.
//! Reads configuration from TOML (~/.config/chargelink/config.toml by
//! default, overridable via CHARGELINK_CONFIG). The demo wiring uses the
//! in-memory collaborators; production deployments replace them behind the
//! same traits.

use std::sync::Arc;

use tracing::{error, info};

use chargelink::config::{default_config_path, AppConfig};
use chargelink::domain::User;
use chargelink::infrastructure::{
    MemoryAuthenticator, MemoryCommandGateway, MemoryLogRepository, MemoryTransactionRepository,
};
use chargelink::interfaces::ws::{notification_router, ClientDeps};
use chargelink::notifications::{Broadcaster, ClientPool};
use chargelink::session::SessionStore;
use chargelink::shared::{listen_for_shutdown_signals, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("CHARGELINK_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level)),
                )
                .init();
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!("Failed to load config: {}. Using defaults.", e);
            AppConfig::default()
        }
    };

    info!("Starting Chargelink notification server...");

    // ── Collaborators (demo wiring) ────────────────────────────
    let transactions = Arc::new(MemoryTransactionRepository::new());
    let logs = Arc::new(MemoryLogRepository::new());
    let authenticator = Arc::new(MemoryAuthenticator::new());
    let gateway = Arc::new(MemoryCommandGateway::new());

    // Demo token so a client can connect out of the box.
    authenticator.insert_token(
        "demo-token",
        User::new(uuid::Uuid::new_v4().to_string(), "demo"),
    );

    // ── Core ───────────────────────────────────────────────────
    let pool = ClientPool::spawn();
    let sessions = SessionStore::shared();
    let watcher_cfg = config.watcher_config();

    let shutdown = ShutdownSignal::new();
    tokio::spawn(listen_for_shutdown_signals(shutdown.clone()));

    let broadcaster = Broadcaster::new(
        pool.clone(),
        Some(logs.clone()),
        watcher_cfg.stream_poll,
        watcher_cfg.repo_timeout,
    )
    .start(shutdown.clone());

    let deps = ClientDeps {
        pool,
        sessions,
        transactions,
        logs: Some(logs),
        authenticator,
        gateway,
        watcher_cfg,
        auth_timeout: config.auth_timeout(),
        queue_capacity: config.server.queue_capacity,
    };

    // ── Serve ──────────────────────────────────────────────────
    let addr = config.server.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Notification server listening on ws://{}/ws", addr);

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, notification_router(deps))
        .with_graceful_shutdown(async move {
            serve_shutdown.wait().await;
            info!("Notification server received shutdown signal");
        })
        .await?;

    shutdown.trigger();
    if let Err(e) = broadcaster.await {
        error!("Broadcaster task panicked: {}", e);
    }

    info!("Chargelink shutdown complete");
    Ok(())
}
