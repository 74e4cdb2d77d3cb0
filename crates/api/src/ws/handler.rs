use aihub_core::catalog::locale::requested_locale;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::session::Session;
use crate::state::AppState;
use crate::ws::dispatch;
use crate::ws::manager::SessionOutbox;
use crate::ws::messages::ServerMessage;

/// Request header carrying the client's preferred catalog locale.
const LOCALE_HEADER: &str = "locale";

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with `WsManager` and
/// managed by two tasks (writer + the receive loop).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let locale = requested_locale(headers.get(LOCALE_HEADER).and_then(|v| v.to_str().ok()));
    // Browsers send each binary message as a single frame, so both caps
    // must allow a whole upload.
    ws.max_message_size(state.config.max_message_size)
        .max_frame_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, locale))
}

/// Manage a single client session after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Creates the session and its staging directory.
///   2. Registers the connection with `WsManager`.
///   3. Spawns a writer task that drains the session outbox.
///   4. Sends the catalog snapshot.
///   5. Dispatches inbound frames on the current task.
///   6. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, state: AppState, locale: Option<String>) {
    let mut session = match Session::create(
        &state.config.temp_dir,
        state.config.persist_tempfiles,
        locale,
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create session staging directory");
            return;
        }
    };
    let session_id = session.id();
    tracing::info!(session_id = %session_id, locale = ?session.locale(), "WebSocket connected");

    let (outbox, mut rx) = state.ws_manager.add(session_id).await;
    let (mut sink, mut stream) = socket.split();

    // Writer task: forward outbox frames to the WebSocket sink. Receipts
    // are released only after their frames are written.
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            for frame in outbound.frames {
                if sink.send(frame).await.is_err() {
                    tracing::debug!(session_id = %session_id, "WebSocket sink closed");
                    return;
                }
            }
            drop(outbound.receipt);
        }
    });

    send_info_list(&state, &session, &outbox).await;

    // Receiver loop: process inbound messages.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                dispatch::handle_text(&state, &mut session, &outbox, text.as_str()).await;
            }
            Ok(Message::Binary(data)) => {
                dispatch::handle_binary(&mut session, &outbox, &data).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(session_id = %session_id, "Pong received");
            }
            Ok(Message::Ping(_)) => {}
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: drop the session's jobs, unregister, stop the writer.
    state.broker.disconnect(session_id).await;
    state.ws_manager.remove(session_id).await;
    drop(outbox);
    send_task.abort();
    session.close().await;
    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}

/// Send the locale-resolved catalog plus engine enumerations.
async fn send_info_list(state: &AppState, session: &Session, outbox: &SessionOutbox) {
    let catalog = std::sync::Arc::clone(&state.catalog);
    let locale = session.locale().map(str::to_string);
    let snapshot =
        match tokio::task::spawn_blocking(move || catalog.snapshot(locale.as_deref())).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "Failed to build catalog snapshot");
                outbox.send(&ServerMessage::error("Failed to load catalog"));
                return;
            }
        };
    let enumerations = state.enumerations.read().await.clone();
    tracing::debug!(
        session_id = %session.id(),
        workflows = snapshot.workflows.len(),
        models = snapshot.models.len(),
        loras = snapshot.loras.len(),
        "Sending catalog snapshot",
    );
    outbox.send(&ServerMessage::InfoList {
        catalog: snapshot,
        enumerations,
    });
}
