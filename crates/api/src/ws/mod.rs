//! WebSocket infrastructure for client sessions.
//!
//! Provides connection management, heartbeat monitoring, the session
//! protocol messages and router, and the HTTP upgrade handler used by
//! Axum routes.

pub mod dispatch;
mod handler;
mod heartbeat;
pub mod manager;
pub mod messages;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
