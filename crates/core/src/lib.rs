//! Domain logic for the workflow request broker.
//!
//! Everything in this crate is free of network I/O: the typed job graph,
//! template extraction, the parameter resolver, the metadata catalog, and
//! the execution engine seam that the server and engine adapters share.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod graph;
pub mod naming;
pub mod protocol;
pub mod resolver;
pub mod template;
pub mod types;
