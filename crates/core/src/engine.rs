//! The execution engine seam.
//!
//! The broker never talks to a concrete engine. It submits [`EngineJob`]s
//! through [`ExecutionEngine`] and consumes [`EngineEvent`]s from a channel
//! the engine implementation writes to from its own tasks or threads.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::graph::JobGraph;
use crate::protocol::UNKNOWN_ERROR;
use crate::types::JobId;

/// A concrete, validated job ready to hand to the engine.
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub id: JobId,
    pub graph: JobGraph,
    /// Node ids the engine must execute regardless of consumers.
    pub outputs: Vec<String>,
}

/// Choice lists the engine exposes to clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Enumerations {
    pub samplers: Vec<String>,
    pub schedulers: Vec<String>,
}

/// Events an engine reports back to the broker.
///
/// Every job-scoped event carries the engine's own job id so that late
/// events from a cancelled run can be discarded.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress {
        engine_job_id: String,
        node_id: String,
        value: u64,
        max: u64,
    },
    /// A JSON message emitted by an action node.
    Message {
        engine_job_id: String,
        payload: Map<String, Value>,
    },
    /// A binary payload emitted by an action node.
    File {
        engine_job_id: String,
        data_type: String,
        action: Value,
        data: Vec<u8>,
    },
    /// The engine's backlog is empty again.
    QueueDrained,
    Connected,
    Disconnected,
}

/// Sending half of the engine event channel.
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Final status of a job as recorded by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded,
    Failed { message: String },
    /// The engine holds no record of the job.
    Unknown,
}

/// Errors from the engine seam.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine is not reachable right now.
    #[error("Execution engine unavailable: {0}")]
    Unavailable(String),

    /// The engine refused the job.
    #[error("Execution engine rejected job: {0}")]
    Rejected(String),

    /// Any other transport or decoding failure.
    #[error("Execution engine error: {0}")]
    Other(String),
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Hand a job to the engine. Returns the engine's id for it.
    async fn submit(&self, job: &EngineJob) -> Result<String, EngineError>;

    /// Ask the engine to stop or drop a job. Best effort, never waits for
    /// the engine to actually stop.
    async fn cancel(&self, engine_job_id: &str) -> Result<(), EngineError>;

    /// Look up how a finished job ended.
    async fn outcome(&self, engine_job_id: &str) -> Result<JobOutcome, EngineError>;

    async fn enumerations(&self) -> Result<Enumerations, EngineError>;

    fn is_connected(&self) -> bool;
}

/// Join engine error messages into one line.
///
/// Newlines inside each message are removed; an empty input yields
/// `"Unknown error"`.
pub fn aggregate_error_messages<I, S>(messages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = messages
        .into_iter()
        .map(|m| m.as_ref().replace(['\r', '\n'], ""))
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        UNKNOWN_ERROR.to_string()
    } else {
        joined
    }
}
