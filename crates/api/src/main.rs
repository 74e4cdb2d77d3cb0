use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aihub_comfyui::engine::{ComfyUIConfig, ComfyUIEngine};
use aihub_comfyui::reconnect::ReconnectConfig;
use aihub_core::catalog::{CatalogStore, MetadataCatalog};
use aihub_core::engine::{Enumerations, ExecutionEngine};
use anyhow::Context;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aihub_api::config::{LogFormat, ServerConfig};
use aihub_api::engine::bridge::EngineBridge;
use aihub_api::engine::broker::JobBroker;
use aihub_api::router::build_app_router;
use aihub_api::state::AppState;
use aihub_api::{background, ws};

/// How long to wait for each background task to stop at shutdown.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "aihub_api=debug,aihub_comfyui=info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        aihub_dir = %config.aihub_dir.display(),
        cache_mode = ?config.cache_mode,
        queue_ttl_secs = config.queue_ttl.map(|ttl| ttl.as_secs()),
        "Loaded server configuration",
    );

    // --- Catalog ---
    let catalog = Arc::new(MetadataCatalog::new(
        CatalogStore::new(config.aihub_dir.clone()),
        config.cache_mode,
    ));

    // --- Execution engine ---
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let comfyui = ComfyUIEngine::start(
        ComfyUIConfig {
            api_url: config.comfyui_api_url.clone(),
            ws_url: config.comfyui_ws_url.clone(),
            reconnect: ReconnectConfig::default(),
        },
        event_tx,
    );
    let engine: Arc<dyn ExecutionEngine> = comfyui.clone();
    tracing::info!(api_url = %config.comfyui_api_url, "ComfyUI engine started");

    // --- Broker ---
    let broker = Arc::new(JobBroker::new(
        Arc::clone(&engine),
        config.finish_drain_timeout,
    ));
    let enumerations = Arc::new(RwLock::new(Enumerations::default()));

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let bridge = EngineBridge::new(
        Arc::clone(&broker),
        Arc::clone(&engine),
        Arc::clone(&enumerations),
    );
    let bridge_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { bridge.run(event_rx, cancel).await }
    });

    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), cancel.clone());

    let expiry_handle = config.queue_ttl.map(|ttl| {
        tokio::spawn(background::queue_expiry::run(
            Arc::clone(&broker),
            ttl,
            cancel.clone(),
        ))
    });

    // --- App state ---
    let config = Arc::new(config);
    let state = AppState {
        config: Arc::clone(&config),
        catalog,
        ws_manager: Arc::clone(&ws_manager),
        broker: Arc::clone(&broker),
        engine,
        enumerations,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Interrupt the running job before the engine connection goes away.
    broker.interrupt_running().await;

    cancel.cancel();
    let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, bridge_handle).await;
    let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, heartbeat_handle).await;
    if let Some(handle) = expiry_handle {
        let _ = tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await;
    }
    tracing::info!("Background tasks stopped");

    comfyui.shutdown().await;
    tracing::info!("ComfyUI engine shut down");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
