//! End-to-end session tests over a real WebSocket connection.

mod common;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aihub_api::router::build_app_router;
use aihub_api::state::AppState;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use common::{test_state, write_json, FakeEngine, WAIT};

async fn serve(state: AppState) -> SocketAddr {
    let config = Arc::clone(&state.config);
    let app = build_app_router(state, &config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn next_text<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    next_text_within(ws, WAIT).await
}

async fn next_text_within<S>(ws: &mut S, wait: Duration) -> Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(wait, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn staging_dirs(temp_dir: &Path) -> usize {
    std::fs::read_dir(temp_dir.join("aihub-sessions"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

fn staged_file(temp_dir: &Path, name: &str) -> std::path::PathBuf {
    let session_dir = std::fs::read_dir(temp_dir.join("aihub-sessions"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    session_dir.path().join(name)
}

#[tokio::test]
async fn connect_receives_localized_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), FakeEngine::new());
    write_json(
        &state.config.aihub_dir,
        "workflows/locale/pt/txt2img.json",
        &json!({"1": {"label": "Texto para imagem"}}),
    );
    let addr = serve(state).await;

    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("locale", HeaderValue::from_static("pt-BR"));
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let info = next_text(&mut ws).await;
    assert_eq!(info["type"], "INFO_LIST");
    assert_eq!(info["workflows"]["txt2img"]["label"], "Texto para imagem");
    assert_eq!(info["workflows"]["img2img"]["label"], "Image to image");
    assert_eq!(info["models"][0]["name"], "SDXL");
    assert!(info["loras"].as_array().unwrap().is_empty());
    assert!(info["samplers"].is_array());
    assert!(info["schedulers"].is_array());
}

#[tokio::test]
async fn upload_larger_than_a_default_frame_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut state = test_state(dir.path(), FakeEngine::new());
    let mut config = (*state.config).clone();
    config.max_message_size = 32 * 1024 * 1024;
    state.config = Arc::new(config);
    let addr = serve(state.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    next_text(&mut ws).await;

    let announce = json!({"type": "FILE_UPLOAD", "filename": "big.png"});
    ws.send(Message::Text(announce.to_string())).await.unwrap();
    assert_eq!(next_text(&mut ws).await["type"], "UPLOAD_ACK");

    let payload = vec![7u8; 20 * 1024 * 1024];
    ws.send(Message::Binary(payload)).await.unwrap();
    // Unmasking a large frame is slow in unoptimised builds.
    assert_eq!(
        next_text_within(&mut ws, Duration::from_secs(30)).await,
        json!({"type": "FILE_UPLOAD_SUCCESS", "file": "big.png"})
    );
    let stored = std::fs::metadata(staged_file(&state.config.temp_dir, "big.png")).unwrap();
    assert_eq!(stored.len(), 20 * 1024 * 1024);
}

#[tokio::test]
async fn ping_round_trip_and_cleanup_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path(), FakeEngine::new());
    let addr = serve(state.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    next_text(&mut ws).await;
    assert_eq!(state.ws_manager.connection_count().await, 1);
    assert_eq!(staging_dirs(&state.config.temp_dir), 1);

    ws.send(Message::Text(json!({"type": "PING", "ping": "abc"}).to_string()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut ws).await, json!({"type": "PONG", "value": "abc"}));

    ws.send(Message::Text("{oops".into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await["message"], "Invalid JSON");

    ws.close(None).await.unwrap();

    let manager = Arc::clone(&state.ws_manager);
    eventually(|| {
        let manager = Arc::clone(&manager);
        async move { manager.connection_count().await == 0 }
    })
    .await;
    let temp_dir = state.config.temp_dir.clone();
    eventually(|| {
        let temp_dir = temp_dir.clone();
        async move { staging_dirs(&temp_dir) == 0 }
    })
    .await;
}

#[tokio::test]
async fn closing_the_socket_cancels_its_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::new();
    let state = test_state(dir.path(), engine.clone());
    let addr = serve(state.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    next_text(&mut ws).await;

    let submit = json!({
        "type": "WORKFLOW_OPERATION",
        "workflow_id": "txt2img",
        "expose": {"steps": 25}
    });
    ws.send(Message::Text(submit.to_string())).await.unwrap();
    let queued = next_text(&mut ws).await;
    assert_eq!(queued["type"], "WORKFLOW_AWAIT");
    assert_eq!(next_text(&mut ws).await["type"], "WORKFLOW_START");
    let job_id = queued["id"].as_str().unwrap().parse().unwrap();

    ws.close(None).await.unwrap();

    engine.wait_cancelled(job_id).await;
    let broker = Arc::clone(&state.broker);
    eventually(|| {
        let broker = Arc::clone(&broker);
        async move { broker.running_job_id().await.is_none() }
    })
    .await;
}
