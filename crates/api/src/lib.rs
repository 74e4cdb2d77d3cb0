//! AIHub broker server library.
//!
//! Exposes the core building blocks (config, state, error handling, routes,
//! job broker, WebSocket protocol router) so integration tests and the
//! binary entrypoint can both access them.

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod router;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;
