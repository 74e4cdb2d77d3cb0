//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum.
//!
//! Besides the stock message kinds, the AIHub action nodes emit two
//! custom events through the same socket:
//!
//! * `aihub_message` - a JSON payload forwarded to the job's client.
//! * `aihub_file` - a header announcing that the next binary frame of
//!   type [`AIHUB_FILE_BINARY_EVENT`] carries a file for the client.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Binary frame event type used by action nodes for file payloads.
///
/// ComfyUI prefixes every binary frame with a big-endian `u32` event
/// type; `1` and `2` are its own preview images.
pub const AIHUB_FILE_BINARY_EVENT: u32 = 0x4149_0001;

/// All known ComfyUI WebSocket message types.
///
/// Deserialized via the adjacently-tagged `"type"` field with
/// associated `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(PromptData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step-level progress of a single node.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// Progress of every node of a prompt.
    #[serde(rename = "progress_state")]
    ProgressState(ProgressStateData),

    /// A node has finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// The prompt finished without error.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptData),

    /// The prompt was interrupted.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptData),

    /// Execution failed with an error.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    /// Client-bound JSON emitted by an action node.
    #[serde(rename = "aihub_message")]
    AihubMessage(AihubMessageData),

    /// Header for a file emitted by an action node.
    #[serde(rename = "aihub_file")]
    AihubFile(AihubFileData),
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i64,
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: f64,
    pub max: f64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressStateData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: HashMap<String, NodeProgress>,
}

/// Per-node entry of a `progress_state` message.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeProgress {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default = "default_max")]
    pub max: f64,
}

fn default_max() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub output: Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AihubMessageData {
    pub prompt_id: String,
    /// The client-bound message itself (`type` plus fields).
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AihubFileData {
    pub prompt_id: String,
    pub data_type: String,
    #[serde(default)]
    pub action: Value,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log unknown types and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Split a binary frame into its event type and payload.
pub fn split_binary_frame(frame: &[u8]) -> Option<(u32, &[u8])> {
    let (head, payload) = frame.split_first_chunk::<4>()?;
    Some((u32::from_be_bytes(*head), payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}},"sid":"abc"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::Status(data) => {
                assert_eq!(data.status.exec_info.queue_remaining, 3);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::Executing(data) => {
                assert!(data.node.is_none());
                assert_eq!(data.prompt_id.as_deref(), Some("xyz"));
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_state_message() {
        let json = r#"{"type":"progress_state","data":{"prompt_id":"p","nodes":{
            "3":{"state":"running","value":4.0,"max":20.0,"node_id":"3"},
            "4":{"state":"pending","value":0,"max":1}}}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::ProgressState(data) => {
                assert_eq!(data.prompt_id, "p");
                assert_eq!(data.nodes["3"].state, "running");
                assert_eq!(data.nodes["3"].max, 20.0);
            }
            other => panic!("Expected ProgressState, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError","traceback":[]}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.node_id, "5");
                assert_eq!(data.exception_message, "out of memory");
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn parse_aihub_message_keeps_payload() {
        let json = r#"{"type":"aihub_message","data":{"prompt_id":"p","type":"STATUS","message":"Loading"}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::AihubMessage(data) => {
                assert_eq!(data.prompt_id, "p");
                assert_eq!(data.payload["type"], "STATUS");
                assert_eq!(data.payload["message"], "Loading");
                assert!(!data.payload.contains_key("prompt_id"));
            }
            other => panic!("Expected AihubMessage, got {other:?}"),
        }
    }

    #[test]
    fn parse_aihub_file_header() {
        let json = r#"{"type":"aihub_file","data":{"prompt_id":"p","data_type":"image/png","action":{"type":"NEW_IMAGE"}}}"#;
        match parse_message(json).unwrap() {
            ComfyUIMessage::AihubFile(data) => {
                assert_eq!(data.data_type, "image/png");
                assert_eq!(data.action["type"], "NEW_IMAGE");
            }
            other => panic!("Expected AihubFile, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        let json = r#"{"type":"crystools.monitor","data":{}}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn splits_binary_frames() {
        let mut frame = AIHUB_FILE_BINARY_EVENT.to_be_bytes().to_vec();
        frame.extend_from_slice(b"png");
        assert_eq!(
            split_binary_frame(&frame),
            Some((AIHUB_FILE_BINARY_EVENT, &b"png"[..]))
        );
        assert_eq!(split_binary_frame(&[0, 1]), None);
    }
}
