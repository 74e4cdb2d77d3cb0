#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aihub_api::config::{LogFormat, ServerConfig};
use aihub_api::engine::broker::{JobBroker, QueuedJob};
use aihub_api::router::build_app_router;
use aihub_api::state::AppState;
use aihub_api::ws::manager::{Outbound, SessionOutbox, WsReceiver};
use aihub_api::ws::WsManager;
use aihub_core::catalog::{CacheMode, CatalogStore, MetadataCatalog};
use aihub_core::engine::{EngineError, EngineJob, Enumerations, ExecutionEngine, JobOutcome};
use aihub_core::graph::JobGraph;
use aihub_core::types::{JobId, SessionId};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::Message;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

/// How long helpers wait for something to show up before failing.
pub const WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Fake execution engine
// ---------------------------------------------------------------------------

/// In-memory engine: records submissions and cancellations, and reports
/// whatever outcome a test assigns to a job.
#[derive(Default)]
pub struct FakeEngine {
    disconnected: AtomicBool,
    reject: AtomicBool,
    submitted: Mutex<Vec<JobId>>,
    cancelled: Mutex<Vec<String>>,
    outcomes: Mutex<HashMap<String, JobOutcome>>,
    /// Held by a test to keep `submit` from returning.
    gate: tokio::sync::Mutex<()>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    pub fn reject_submissions(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<JobId> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn record_outcome(&self, job_id: JobId, outcome: JobOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(job_id.to_string(), outcome);
    }

    /// Block every `submit` until the returned guard is dropped.
    pub async fn hold_submissions(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Poll until `job_id` shows up among the cancellations.
    pub async fn wait_cancelled(&self, job_id: JobId) {
        let id = job_id.to_string();
        tokio::time::timeout(WAIT, async {
            while !self.cancelled().contains(&id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("engine cancellation was not sent");
    }
}

#[async_trait]
impl ExecutionEngine for FakeEngine {
    async fn submit(&self, job: &EngineJob) -> Result<String, EngineError> {
        let _gate = self.gate.lock().await;
        if self.reject.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("prompt has no outputs".into()));
        }
        self.submitted.lock().unwrap().push(job.id);
        Ok(job.id.to_string())
    }

    async fn cancel(&self, engine_job_id: &str) -> Result<(), EngineError> {
        self.cancelled
            .lock()
            .unwrap()
            .push(engine_job_id.to_string());
        Ok(())
    }

    async fn outcome(&self, engine_job_id: &str) -> Result<JobOutcome, EngineError> {
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .get(engine_job_id)
            .cloned()
            .unwrap_or(JobOutcome::Unknown))
    }

    async fn enumerations(&self) -> Result<Enumerations, EngineError> {
        Ok(Enumerations {
            samplers: vec!["euler".into(), "dpmpp_2m".into()],
            schedulers: vec!["normal".into(), "karras".into()],
        })
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Broker helpers
// ---------------------------------------------------------------------------

pub fn broker(engine: &Arc<FakeEngine>) -> Arc<JobBroker> {
    Arc::new(JobBroker::new(engine.clone(), WAIT))
}

/// A registered-nowhere session outbox.
pub fn session() -> (SessionOutbox, WsReceiver) {
    SessionOutbox::channel(SessionId::new_v4())
}

pub fn graph() -> JobGraph {
    JobGraph::from_value(json!({
        "3": {"class_type": "KSampler", "inputs": {}, "_meta": {"title": "Sampler"}},
        "9": {"class_type": "AIHubActionNewImage", "inputs": {}}
    }))
    .unwrap()
}

pub fn job(owner: &SessionOutbox) -> QueuedJob {
    QueuedJob::new("txt2img".into(), graph(), vec!["9".into()], owner.clone())
}

/// Next outbound unit, failing the test if nothing arrives in time.
pub async fn next_outbound(rx: &mut WsReceiver) -> Outbound {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an outbound message")
        .expect("outbox closed")
}

/// Next outbound text frame as JSON.
pub async fn next_json(rx: &mut WsReceiver) -> Value {
    frame_json(&next_outbound(rx).await.frames[0])
}

pub fn frame_json(frame: &Message) -> Value {
    match frame {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Everything currently queued, without waiting.
pub fn drain_json(rx: &mut WsReceiver) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        for frame in &outbound.frames {
            if let Message::Text(_) = frame {
                out.push(frame_json(frame));
            }
        }
    }
    out
}

pub async fn wait_running(broker: &JobBroker) -> JobId {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(id) = broker.running_job_id().await {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no job started running")
}

// ---------------------------------------------------------------------------
// Application helpers
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` rooted in `dir`.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        aihub_dir: dir.join("aihub"),
        cache_mode: CacheMode::Hot,
        persist_tempfiles: false,
        temp_dir: dir.join("tmp"),
        max_message_size: 1024 * 1024,
        queue_ttl: None,
        finish_drain_timeout: WAIT,
        comfyui_api_url: "http://127.0.0.1:1".to_string(),
        comfyui_ws_url: "ws://127.0.0.1:1".to_string(),
        log_format: LogFormat::Pretty,
    }
}

pub fn write_json(root: &Path, rel: &str, value: &Value) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
}

/// A store with one runnable template (`txt2img`, one `steps` parameter).
pub fn seed_store(aihub_dir: &Path) {
    write_json(
        aihub_dir,
        "workflows/txt2img.json",
        &json!({
            "1": {"class_type": "AIHubWorkflowController", "inputs": {"id": "txt2img", "label": "Text to image"}},
            "2": {"class_type": "AIHubExposeSteps", "inputs": {"id": "steps", "label": "Steps", "value": 20}},
            "3": {"class_type": "KSampler", "inputs": {"steps": ["2", 0]}},
            "9": {"class_type": "AIHubActionNewImage", "inputs": {"image": ["3", 0]}}
        }),
    );
    write_json(
        aihub_dir,
        "workflows/img2img.json",
        &json!({
            "1": {"class_type": "AIHubWorkflowController", "inputs": {"id": "img2img", "label": "Image to image"}},
            "2": {"class_type": "AIHubExposeImage", "inputs": {"id": "init", "label": "Init image"}},
            "9": {"class_type": "AIHubActionNewImage", "inputs": {"image": ["2", 0]}}
        }),
    );
    write_json(
        aihub_dir,
        "models/sdxl.json",
        &json!({"file": "sdxl.safetensors", "name": "SDXL"}),
    );
    std::fs::write(aihub_dir.join("workflows/txt2img.png"), b"PNG").unwrap();
}

pub fn test_state(dir: &Path, engine: Arc<FakeEngine>) -> AppState {
    let config = test_config(dir);
    seed_store(&config.aihub_dir);
    let catalog = Arc::new(MetadataCatalog::new(
        CatalogStore::new(config.aihub_dir.clone()),
        config.cache_mode,
    ));
    AppState {
        config: Arc::new(config),
        catalog,
        ws_manager: Arc::new(WsManager::new()),
        broker: broker(&engine),
        engine,
        enumerations: Arc::new(RwLock::new(Enumerations::default())),
    }
}

/// Build the full application router with all middleware layers.
pub fn build_test_app(dir: &Path, engine: Arc<FakeEngine>) -> Router {
    let state = test_state(dir, engine);
    let config = Arc::clone(&state.config);
    build_app_router(state, &config)
}

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
