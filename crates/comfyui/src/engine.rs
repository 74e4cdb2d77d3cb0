//! [`ExecutionEngine`] implementation backed by one ComfyUI instance.
//!
//! [`ComfyUIEngine::start`] spawns a long-lived connection task
//! (connect -> process -> reconnect) that writes [`EngineEvent`]s to the
//! channel supplied by the caller. Submission, cancellation and outcome
//! lookups go through the REST API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aihub_core::engine::{
    EngineError, EngineEvent, EngineEventSender, EngineJob, Enumerations, ExecutionEngine,
    JobOutcome,
};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::ComfyUIClient;
use crate::introspection::{enumerations_from_object_info, outcome_from_history};
use crate::processor::process_messages;
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// How long [`ComfyUIEngine::shutdown`] waits for the connection task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Node class whose input schema lists samplers and schedulers.
const SAMPLER_NODE_CLASS: &str = "KSampler";

/// Connection settings for one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub ws_url: String,
    pub reconnect: ReconnectConfig,
}

pub struct ComfyUIEngine {
    api: ComfyUIApi,
    client: Arc<ComfyUIClient>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ComfyUIEngine {
    /// Create the engine and spawn its connection task.
    ///
    /// Returns a shared handle that is safe to clone into Axum state.
    pub fn start(config: ComfyUIConfig, events: EngineEventSender) -> Arc<Self> {
        let client = Arc::new(ComfyUIClient::new(config.ws_url));
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task_handle = tokio::spawn({
            let client = Arc::clone(&client);
            let connected = Arc::clone(&connected);
            let cancel = cancel.clone();
            let reconnect = config.reconnect;
            async move {
                tracing::info!(ws_url = client.ws_url(), "Starting ComfyUI connection task");
                run_connection_loop(&client, &reconnect, &connected, &events, &cancel).await;
                tracing::info!("ComfyUI connection task exited");
            }
        });

        Arc::new(Self {
            api: ComfyUIApi::new(config.api_url),
            client,
            connected,
            cancel,
            task_handle: Mutex::new(Some(task_handle)),
        })
    }

    /// Stop the connection task, waiting briefly for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ComfyUI engine");
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionEngine for ComfyUIEngine {
    async fn submit(&self, job: &EngineJob) -> Result<String, EngineError> {
        let prompt_id = job.id.to_string();
        let prompt = job
            .graph
            .to_value()
            .map_err(|e| EngineError::Other(e.to_string()))?;
        let response = self
            .api
            .submit_prompt(
                &prompt,
                self.client.client_id(),
                &prompt_id,
                &job.outputs,
            )
            .await
            .map_err(classify)?;

        tracing::info!(
            job_id = %job.id,
            prompt_id = %response.prompt_id,
            queue_number = response.number,
            outputs = job.outputs.len(),
            "Prompt submitted to ComfyUI",
        );
        Ok(response.prompt_id)
    }

    async fn cancel(&self, engine_job_id: &str) -> Result<(), EngineError> {
        // The prompt may be running or still queued; try both.
        let interrupted = self.api.interrupt(engine_job_id).await;
        let deleted = self.api.delete_queued(engine_job_id).await;
        tracing::info!(prompt_id = %engine_job_id, "Cancellation sent to ComfyUI");
        interrupted.and(deleted).map_err(classify)
    }

    async fn outcome(&self, engine_job_id: &str) -> Result<JobOutcome, EngineError> {
        let history = self.api.get_history(engine_job_id).await.map_err(classify)?;
        Ok(outcome_from_history(&history, engine_job_id))
    }

    async fn enumerations(&self) -> Result<Enumerations, EngineError> {
        let info = self
            .api
            .object_info(SAMPLER_NODE_CLASS)
            .await
            .map_err(classify)?;
        Ok(enumerations_from_object_info(&info))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Core connection loop: connect -> process messages -> reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(
    client: &ComfyUIClient,
    reconnect: &ReconnectConfig,
    connected: &AtomicBool,
    events: &EngineEventSender,
    cancel: &CancellationToken,
) {
    let mut next = client.connect().await;

    loop {
        let conn = match next {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Connection failed, entering reconnect loop");
                match reconnect_loop(client, reconnect, cancel).await {
                    Some(conn) => conn,
                    None => return,
                }
            }
        };

        connected.store(true, Ordering::SeqCst);
        let _ = events.send(EngineEvent::Connected);

        let mut ws_stream = conn.ws_stream;
        process_messages(&mut ws_stream, events, cancel).await;

        connected.store(false, Ordering::SeqCst);
        let _ = events.send(EngineEvent::Disconnected);

        if cancel.is_cancelled() {
            return;
        }

        tracing::info!("ComfyUI connection lost, entering reconnect loop");
        match reconnect_loop(client, reconnect, cancel).await {
            Some(conn) => next = Ok(conn),
            None => return,
        }
    }
}

fn classify(e: ComfyUIApiError) -> EngineError {
    match e {
        ComfyUIApiError::Request(e) => EngineError::Unavailable(e.to_string()),
        ComfyUIApiError::ApiError { status, body } if (400..500).contains(&status) => {
            EngineError::Rejected(body)
        }
        other => EngineError::Other(other.to_string()),
    }
}
