//! Job execution (single-flight broker).
//!
//! Contains the FIFO broker that owns the wait list and the running slot,
//! the in-flight barrier that orders a job's final event after its
//! progress, and the bridge task that applies engine events to the broker.

pub mod barrier;
pub mod bridge;
pub mod broker;
