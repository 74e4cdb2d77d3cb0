//! Single-flight FIFO job broker.
//!
//! The broker owns the wait list and the running slot behind one mutex.
//! At most one job occupies the running slot at any time. Outbound
//! messages are pushed onto session outboxes while the lock is held (a
//! non-blocking channel send); the socket writes happen in each session's
//! writer task.
//!
//! A running job moves through three phases:
//!
//! * `Submitting` - handed to the engine, engine id not known yet. A queue
//!   drain seen here is remembered and re-checked once submission returns.
//! * `Running` - engine id known; progress is forwarded.
//! * `Finishing` - the engine reported an outcome; the broker waits for the
//!   job's in-flight messages to drain before sending `WORKFLOW_FINISHED`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aihub_core::engine::{EngineJob, ExecutionEngine, JobOutcome};
use aihub_core::graph::JobGraph;
use aihub_core::protocol::{CANCELLED_BY_USER, ENGINE_DISCONNECTED, EXPIRED_IN_QUEUE};
use aihub_core::types::{JobId, SessionId};
use axum::extract::ws::Message;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::engine::barrier::InFlight;
use crate::ws::manager::{json_frame, to_frame, SessionOutbox};
use crate::ws::messages::ServerMessage;

/// A validated job waiting for the engine.
#[derive(Debug)]
pub struct QueuedJob {
    pub id: JobId,
    pub workflow_id: String,
    pub graph: JobGraph,
    pub outputs: Vec<String>,
    pub owner: SessionOutbox,
    pub enqueued_at: Instant,
}

impl QueuedJob {
    pub fn new(
        workflow_id: String,
        graph: JobGraph,
        outputs: Vec<String>,
        owner: SessionOutbox,
    ) -> Self {
        Self {
            id: JobId::new_v4(),
            workflow_id,
            graph,
            outputs,
            owner,
            enqueued_at: Instant::now(),
        }
    }

    fn owned_by(&self, session_id: SessionId) -> bool {
        self.owner.session_id() == session_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Submitting { drain_seen: bool },
    Running { engine_job_id: String },
    Finishing { engine_job_id: String },
}

#[derive(Debug)]
struct RunningJob {
    job: QueuedJob,
    phase: Phase,
    in_flight: InFlight,
}

impl RunningJob {
    fn new(job: QueuedJob) -> Self {
        Self {
            job,
            phase: Phase::Submitting { drain_seen: false },
            in_flight: InFlight::new(),
        }
    }

    fn engine_job_id(&self) -> Option<&str> {
        match &self.phase {
            Phase::Submitting { .. } => None,
            Phase::Running { engine_job_id } | Phase::Finishing { engine_job_id } => {
                Some(engine_job_id)
            }
        }
    }

    /// Whether an engine event tagged `engine_job_id` belongs to this job.
    fn matches(&self, engine_job_id: &str) -> bool {
        self.engine_job_id() == Some(engine_job_id) || self.job.id.to_string() == engine_job_id
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    waiting: VecDeque<QueuedJob>,
    running: Option<RunningJob>,
}

/// What a cancel request hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Running,
    Queued,
    NotFound,
}

pub struct JobBroker {
    engine: Arc<dyn ExecutionEngine>,
    state: Mutex<BrokerState>,
    drain_timeout: Duration,
}

impl JobBroker {
    /// * `drain_timeout` - upper bound on the wait for a finished job's
    ///   outbound messages before `WORKFLOW_FINISHED` is sent anyway.
    pub fn new(engine: Arc<dyn ExecutionEngine>, drain_timeout: Duration) -> Self {
        Self {
            engine,
            state: Mutex::new(BrokerState::default()),
            drain_timeout,
        }
    }

    /// Append a job to the wait list and tell its owner the position.
    ///
    /// Returns the position (`before_this`) the job was queued at.
    pub async fn enqueue(&self, job: QueuedJob) -> usize {
        let position = {
            let mut state = self.state.lock().await;
            let position = state.waiting.len();
            job.owner.send(&ServerMessage::WorkflowAwait {
                id: job.id,
                workflow_id: job.workflow_id.clone(),
                before_this: position,
            });
            tracing::info!(
                job_id = %job.id,
                session_id = %job.owner.session_id(),
                workflow_id = %job.workflow_id,
                position,
                "Job queued",
            );
            state.waiting.push_back(job);
            position
        };
        self.dispatch_next().await;
        position
    }

    /// Start the oldest queued job if the running slot is free.
    ///
    /// Loops while submissions fail or finish immediately, so one call
    /// leaves either a job running or the queue empty (or the engine
    /// disconnected).
    pub async fn dispatch_next(&self) {
        loop {
            let engine_job = {
                let mut state = self.state.lock().await;
                if state.running.is_some() {
                    return;
                }
                if !self.engine.is_connected() {
                    if !state.waiting.is_empty() {
                        tracing::debug!(
                            queued = state.waiting.len(),
                            "Engine not connected, holding queue",
                        );
                    }
                    return;
                }
                let Some(job) = state.waiting.pop_front() else {
                    return;
                };
                announce_positions(&state.waiting, 0);
                job.owner.send(&ServerMessage::WorkflowStart {
                    id: job.id,
                    workflow_id: job.workflow_id.clone(),
                });
                tracing::info!(
                    job_id = %job.id,
                    session_id = %job.owner.session_id(),
                    workflow_id = %job.workflow_id,
                    remaining = state.waiting.len(),
                    "Job dispatched",
                );
                let engine_job = EngineJob {
                    id: job.id,
                    graph: job.graph.clone(),
                    outputs: job.outputs.clone(),
                };
                state.running = Some(RunningJob::new(job));
                engine_job
            };

            let submitted = self.engine.submit(&engine_job).await;

            let early_drain = {
                let mut state = self.state.lock().await;
                let still_running = state
                    .running
                    .as_ref()
                    .is_some_and(|r| r.job.id == engine_job.id);

                match submitted {
                    Ok(engine_job_id) if !still_running => {
                        drop(state);
                        tracing::info!(
                            job_id = %engine_job.id,
                            engine_job_id = %engine_job_id,
                            "Job left the running slot during submission, cancelling on engine",
                        );
                        self.cancel_on_engine(engine_job_id);
                        return;
                    }
                    Ok(engine_job_id) => {
                        let Some(running) = state.running.as_mut() else {
                            return;
                        };
                        let drain_seen =
                            matches!(running.phase, Phase::Submitting { drain_seen: true });
                        tracing::info!(
                            job_id = %engine_job.id,
                            engine_job_id = %engine_job_id,
                            "Job running on engine",
                        );
                        running.phase = Phase::Running {
                            engine_job_id: engine_job_id.clone(),
                        };
                        drain_seen.then_some(engine_job_id)
                    }
                    Err(e) if still_running => {
                        tracing::error!(job_id = %engine_job.id, error = %e, "Job submission failed");
                        if let Some(running) = state.running.take() {
                            running.job.owner.send(&ServerMessage::finished_err(
                                running.job.id,
                                &running.job.workflow_id,
                                e.to_string(),
                            ));
                        }
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(
                            job_id = %engine_job.id,
                            error = %e,
                            "Submission failed for a job that already left the running slot",
                        );
                        return;
                    }
                }
            };

            // The engine drained while we were submitting; the job may
            // already be done.
            let Some(engine_job_id) = early_drain else {
                return;
            };
            if !self.settle(engine_job.id, &engine_job_id).await {
                return;
            }
        }
    }

    /// Cancel `job_id` on behalf of `session_id`.
    ///
    /// Only the owning session may cancel a job. A running job is freed
    /// immediately; the engine interrupt is sent in the background.
    pub async fn cancel(&self, session_id: SessionId, job_id: JobId) -> CancelOutcome {
        let mut state = self.state.lock().await;

        if let Some(running) = state
            .running
            .take_if(|r| r.job.id == job_id && r.job.owned_by(session_id))
        {
            drop(state);
            running.job.owner.send(&ServerMessage::cancelled(
                job_id,
                &running.job.workflow_id,
                CANCELLED_BY_USER,
            ));
            tracing::info!(job_id = %job_id, session_id = %session_id, "Running job cancelled");
            if let Some(engine_job_id) = running.engine_job_id() {
                self.cancel_on_engine(engine_job_id.to_string());
            }
            self.dispatch_next().await;
            return CancelOutcome::Running;
        }

        let Some(index) = state
            .waiting
            .iter()
            .position(|j| j.id == job_id && j.owned_by(session_id))
        else {
            tracing::debug!(job_id = %job_id, session_id = %session_id, "Cancel for unknown job ignored");
            return CancelOutcome::NotFound;
        };

        if let Some(job) = state.waiting.remove(index) {
            job.owner.send(&ServerMessage::cancelled(
                job.id,
                &job.workflow_id,
                CANCELLED_BY_USER,
            ));
            tracing::info!(job_id = %job_id, session_id = %session_id, "Queued job cancelled");
        }
        announce_positions(&state.waiting, index);
        CancelOutcome::Queued
    }

    /// Drop everything a disconnected session owns.
    ///
    /// Its queued jobs are removed (the rest renumbered) and its running
    /// job, if any, is cancelled and the next job dispatched. Nothing is
    /// sent to the departed session.
    pub async fn disconnect(&self, session_id: SessionId) {
        let mut state = self.state.lock().await;

        let first_removed = state.waiting.iter().position(|j| j.owned_by(session_id));
        let before = state.waiting.len();
        state.waiting.retain(|j| !j.owned_by(session_id));
        let removed = before - state.waiting.len();
        if let Some(from) = first_removed {
            announce_positions(&state.waiting, from);
        }

        let running = state.running.take_if(|r| r.job.owned_by(session_id));
        drop(state);

        if removed > 0 || running.is_some() {
            tracing::info!(
                session_id = %session_id,
                removed,
                was_running = running.is_some(),
                "Dropped jobs of disconnected session",
            );
        }

        if let Some(running) = running {
            if let Some(engine_job_id) = running.engine_job_id() {
                self.cancel_on_engine(engine_job_id.to_string());
            }
            self.dispatch_next().await;
        }
    }

    /// Remove queued jobs that have waited at least `ttl`.
    ///
    /// Owners receive an error `WORKFLOW_FINISHED`; the rest of the queue
    /// is renumbered. Returns how many jobs expired.
    pub async fn expire_older_than(&self, ttl: Duration) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let is_expired = |job: &QueuedJob| now.duration_since(job.enqueued_at) >= ttl;

        let Some(first) = state.waiting.iter().position(is_expired) else {
            return 0;
        };

        let (expired, kept): (VecDeque<_>, VecDeque<_>) =
            state.waiting.drain(..).partition(|job| is_expired(job));
        state.waiting = kept;

        for job in &expired {
            job.owner.send(&ServerMessage::finished_err(
                job.id,
                &job.workflow_id,
                EXPIRED_IN_QUEUE,
            ));
            tracing::info!(job_id = %job.id, session_id = %job.owner.session_id(), "Queued job expired");
        }
        announce_positions(&state.waiting, first);
        expired.len()
    }

    /// Forward node progress to the running job's owner.
    pub async fn on_progress(&self, engine_job_id: &str, node_id: &str, value: u64, max: u64) {
        let state = self.state.lock().await;
        let Some(running) = state.running.as_ref().filter(|r| r.matches(engine_job_id)) else {
            tracing::trace!(engine_job_id, node_id, "Discarding progress for a job that is not running");
            return;
        };
        let message = ServerMessage::WorkflowStatus {
            id: running.job.id,
            workflow_id: running.job.workflow_id.clone(),
            node_id: node_id.to_string(),
            node_name: running.job.graph.node_title(node_id),
            progress: value,
            total: max,
        };
        running.job.owner.send_tracked(&message, running.in_flight.track());
    }

    /// Forward an action node's JSON message, stamped with the job ids.
    pub async fn on_message(&self, engine_job_id: &str, mut payload: Map<String, Value>) {
        let state = self.state.lock().await;
        let Some(running) = state.running.as_ref().filter(|r| r.matches(engine_job_id)) else {
            tracing::trace!(engine_job_id, "Discarding message for a job that is not running");
            return;
        };
        payload.insert("id".into(), Value::String(running.job.id.to_string()));
        payload.insert(
            "workflow_id".into(),
            Value::String(running.job.workflow_id.clone()),
        );
        running.job.owner.push(
            vec![json_frame(&Value::Object(payload))],
            Some(running.in_flight.track()),
        );
    }

    /// Forward an action node's file as a `FILE` header plus one binary
    /// frame, queued as a single unit so nothing can slip in between.
    pub async fn on_file(&self, engine_job_id: &str, data_type: String, action: Value, data: Vec<u8>) {
        let state = self.state.lock().await;
        let Some(running) = state.running.as_ref().filter(|r| r.matches(engine_job_id)) else {
            tracing::trace!(engine_job_id, bytes = data.len(), "Discarding file for a job that is not running");
            return;
        };
        let header = ServerMessage::File {
            id: running.job.id,
            workflow_id: running.job.workflow_id.clone(),
            data_type,
            action,
        };
        running.job.owner.push(
            vec![to_frame(&header), Message::Binary(data.into())],
            Some(running.in_flight.track()),
        );
    }

    /// The engine's backlog is empty: settle the running job and move on.
    pub async fn on_queue_drained(&self) {
        let target = {
            let mut state = self.state.lock().await;
            match state.running.as_mut() {
                None => None,
                Some(running) => match &mut running.phase {
                    Phase::Submitting { drain_seen } => {
                        *drain_seen = true;
                        return;
                    }
                    Phase::Running { engine_job_id } => Some((running.job.id, engine_job_id.clone())),
                    Phase::Finishing { .. } => return,
                },
            }
        };

        match target {
            Some((job_id, engine_job_id)) => {
                if self.settle(job_id, &engine_job_id).await {
                    self.dispatch_next().await;
                }
            }
            None => self.dispatch_next().await,
        }
    }

    pub async fn on_engine_connected(&self) {
        self.dispatch_next().await;
    }

    /// The engine connection dropped: whatever was running is lost.
    pub async fn on_engine_lost(&self) {
        let running = self.state.lock().await.running.take();
        if let Some(running) = running {
            tracing::warn!(job_id = %running.job.id, "Engine disconnected while a job was running");
            running.job.owner.send(&ServerMessage::finished_err(
                running.job.id,
                &running.job.workflow_id,
                ENGINE_DISCONNECTED,
            ));
        }
    }

    /// Interrupt the running job on the engine (used at shutdown).
    pub async fn interrupt_running(&self) {
        let running = self.state.lock().await.running.take();
        let Some(engine_job_id) = running.as_ref().and_then(RunningJob::engine_job_id) else {
            return;
        };
        if let Err(e) = self.engine.cancel(engine_job_id).await {
            tracing::warn!(engine_job_id, error = %e, "Failed to interrupt running job");
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    pub async fn running_job_id(&self) -> Option<JobId> {
        self.state.lock().await.running.as_ref().map(|r| r.job.id)
    }

    /// Ids of queued jobs in dispatch order.
    pub async fn queued_job_ids(&self) -> Vec<JobId> {
        self.state.lock().await.waiting.iter().map(|j| j.id).collect()
    }

    /// Consult the engine's record of a job; if it has an outcome, wait for
    /// the job's messages to drain and send `WORKFLOW_FINISHED`.
    ///
    /// Returns `true` if the running slot was freed.
    async fn settle(&self, job_id: JobId, engine_job_id: &str) -> bool {
        let outcome = match self.engine.outcome(engine_job_id).await {
            Ok(JobOutcome::Unknown) => {
                tracing::debug!(job_id = %job_id, engine_job_id, "No outcome recorded yet, job keeps running");
                return false;
            }
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to fetch job outcome");
                return false;
            }
        };

        let in_flight = {
            let mut state = self.state.lock().await;
            match state.running.as_mut() {
                Some(running)
                    if running.job.id == job_id
                        && matches!(running.phase, Phase::Running { .. }) =>
                {
                    running.phase = Phase::Finishing {
                        engine_job_id: engine_job_id.to_string(),
                    };
                    running.in_flight.clone()
                }
                _ => return false,
            }
        };

        if tokio::time::timeout(self.drain_timeout, in_flight.drained())
            .await
            .is_err()
        {
            tracing::warn!(
                job_id = %job_id,
                pending = in_flight.pending(),
                "Timed out waiting for job messages to drain",
            );
        }

        let mut state = self.state.lock().await;
        let Some(running) = state.running.take_if(|r| r.job.id == job_id) else {
            return false;
        };
        let message = match outcome {
            JobOutcome::Failed { message } => {
                tracing::warn!(job_id = %job_id, error = %message, "Job failed");
                ServerMessage::finished_err(job_id, &running.job.workflow_id, message)
            }
            _ => {
                tracing::info!(job_id = %job_id, "Job finished");
                ServerMessage::finished_ok(job_id, &running.job.workflow_id)
            }
        };
        running.job.owner.send(&message);
        true
    }

    fn cancel_on_engine(&self, engine_job_id: String) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(e) = engine.cancel(&engine_job_id).await {
                tracing::warn!(engine_job_id = %engine_job_id, error = %e, "Engine cancellation failed");
            }
        });
    }
}

/// Tell every waiting job from `from` onward its current position.
fn announce_positions(waiting: &VecDeque<QueuedJob>, from: usize) {
    for (position, job) in waiting.iter().enumerate().skip(from) {
        job.owner.send(&ServerMessage::WorkflowAwait {
            id: job.id,
            workflow_id: job.workflow_id.clone(),
            before_this: position,
        });
    }
}
