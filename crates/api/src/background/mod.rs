//! Periodic background jobs.

pub mod queue_expiry;
