use std::sync::Arc;

use aihub_core::catalog::MetadataCatalog;
use aihub_core::engine::{Enumerations, ExecutionEngine};
use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::engine::broker::JobBroker;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Template and asset catalog.
    pub catalog: Arc<MetadataCatalog>,
    /// WebSocket connection manager (client sessions).
    pub ws_manager: Arc<WsManager>,
    /// The single-flight job queue.
    pub broker: Arc<JobBroker>,
    pub engine: Arc<dyn ExecutionEngine>,
    /// Sampler and scheduler names, refreshed on every engine connect.
    pub enumerations: Arc<RwLock<Enumerations>>,
}
