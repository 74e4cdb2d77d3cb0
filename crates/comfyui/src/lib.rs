//! ComfyUI execution engine adapter.
//!
//! Provides typed message parsing, WebSocket connection management,
//! HTTP API wrappers, reconnection logic, and an [`ExecutionEngine`]
//! implementation that reports engine activity as [`EngineEvent`]s.
//!
//! [`ExecutionEngine`]: aihub_core::engine::ExecutionEngine
//! [`EngineEvent`]: aihub_core::engine::EngineEvent

pub mod api;
pub mod client;
pub mod engine;
pub mod introspection;
pub mod messages;
pub mod processor;
pub mod reconnect;
