//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them
//! into typed [`ComfyUIMessage`] variants, and forwards the ones the
//! broker cares about as [`EngineEvent`]s.

use aihub_core::engine::{EngineEvent, EngineEventSender};
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUIStream;
use crate::messages::{
    parse_message, split_binary_frame, AihubFileData, ComfyUIMessage, AIHUB_FILE_BINARY_EVENT,
};

/// Turns ComfyUI frames into engine events.
///
/// Stateful only for the file handshake: an `aihub_file` header is held
/// until the binary frame that carries its payload.
#[derive(Debug, Default)]
pub struct MessageTranslator {
    pending_file: Option<AihubFileData>,
}

impl MessageTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_text(&mut self, text: &str) -> Option<EngineEvent> {
        let msg = match parse_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, raw_message = %text, "Ignoring ComfyUI message");
                return None;
            }
        };

        match msg {
            ComfyUIMessage::Status(data) => {
                let queue_remaining = data.status.exec_info.queue_remaining;
                tracing::debug!(queue_remaining, "ComfyUI queue status");
                (queue_remaining == 0).then_some(EngineEvent::QueueDrained)
            }
            ComfyUIMessage::ProgressState(data) => {
                let (node_id, node) = data.nodes.iter().find(|(_, n)| n.state == "running")?;
                Some(EngineEvent::Progress {
                    engine_job_id: data.prompt_id.clone(),
                    node_id: node_id.clone(),
                    value: node.value.max(0.0) as u64,
                    max: node.max.max(0.0) as u64,
                })
            }
            ComfyUIMessage::AihubMessage(data) => Some(EngineEvent::Message {
                engine_job_id: data.prompt_id,
                payload: data.payload,
            }),
            ComfyUIMessage::AihubFile(data) => {
                if self.pending_file.replace(data).is_some() {
                    tracing::warn!("File header replaced before its payload arrived");
                }
                None
            }
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution started");
                None
            }
            ComfyUIMessage::ExecutionError(data) => {
                tracing::error!(
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                None
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution interrupted");
                None
            }
            ComfyUIMessage::ExecutionSuccess(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution succeeded");
                None
            }
            ComfyUIMessage::Executing(_)
            | ComfyUIMessage::Executed(_)
            | ComfyUIMessage::ExecutionCached(_)
            | ComfyUIMessage::Progress(_) => None,
        }
    }

    pub fn on_binary(&mut self, frame: &[u8]) -> Option<EngineEvent> {
        let (event_type, payload) = split_binary_frame(frame)?;
        if event_type != AIHUB_FILE_BINARY_EVENT {
            tracing::trace!(event_type, "Ignoring binary message (preview image)");
            return None;
        }
        let Some(header) = self.pending_file.take() else {
            tracing::warn!(bytes = payload.len(), "File payload without a header, dropped");
            return None;
        };
        Some(EngineEvent::File {
            engine_job_id: header.prompt_id,
            data_type: header.data_type,
            action: header.action,
            data: payload.to_vec(),
        })
    }
}

/// Process WebSocket messages from a ComfyUI connection.
///
/// Loops until the WebSocket closes, encounters a fatal receive error,
/// the stream is exhausted, or `cancel` fires.
pub async fn process_messages(
    ws_stream: &mut ComfyUIStream,
    events: &EngineEventSender,
    cancel: &CancellationToken,
) {
    let mut translator = MessageTranslator::new();

    loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => break,
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        let event = match msg_result {
            Ok(Message::Text(text)) => translator.on_text(&text),
            Ok(Message::Binary(data)) => translator.on_binary(&data),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "WebSocket receive error");
                break;
            }
        };

        if let Some(event) = event {
            if events.send(event).is_err() {
                tracing::warn!("Engine event receiver dropped, stopping processor");
                break;
            }
        }
    }
}
