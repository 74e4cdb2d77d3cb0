//! Session protocol messages.
//!
//! Inbound text frames are parsed into [`ClientMessage`]; everything the
//! server sends (except action-node passthrough JSON and file payloads)
//! is a [`ServerMessage`] tagged by its `type` field.

use aihub_core::catalog::CatalogSnapshot;
use aihub_core::engine::Enumerations;
use aihub_core::protocol::{
    MSG_TYPE_FILE_CHECK_EXISTS, MSG_TYPE_FILE_UPLOAD, MSG_TYPE_PING, MSG_TYPE_WORKFLOW_OPERATION,
};
use aihub_core::types::JobId;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// A parsed inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ping {
        value: Value,
    },
    FileCheckExists {
        filename: String,
    },
    FileUpload {
        filename: String,
        if_not_exists: bool,
    },
    Cancel {
        job_id: JobId,
    },
    Submit {
        workflow_id: String,
        expose: Map<String, Value>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let kind = match obj.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::MissingType),
        };

        match kind.as_str() {
            MSG_TYPE_PING => {
                let value = obj.remove("ping").ok_or(ProtocolError::MissingField("ping"))?;
                Ok(Self::Ping { value })
            }
            MSG_TYPE_FILE_CHECK_EXISTS => {
                let filename = take_string(&mut obj, "filename").ok_or(ProtocolError::MissingFileName)?;
                Ok(Self::FileCheckExists { filename })
            }
            MSG_TYPE_FILE_UPLOAD => {
                let filename =
                    take_string(&mut obj, "filename").ok_or(ProtocolError::MissingField("filename"))?;
                let if_not_exists = obj
                    .get("if_not_exists")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(Self::FileUpload {
                    filename,
                    if_not_exists,
                })
            }
            MSG_TYPE_WORKFLOW_OPERATION => {
                if let Some(cancel) = obj.get("cancel") {
                    let job_id = cancel
                        .as_str()
                        .and_then(|s| JobId::parse_str(s).ok())
                        .ok_or(ProtocolError::InvalidCancelId)?;
                    return Ok(Self::Cancel { job_id });
                }
                let workflow_id =
                    take_string(&mut obj, "workflow_id").ok_or(ProtocolError::MissingWorkflowId)?;
                let expose = match obj.remove("expose") {
                    Some(Value::Object(expose)) => expose,
                    _ => return Err(ProtocolError::MissingExpose),
                };
                Ok(Self::Submit {
                    workflow_id,
                    expose,
                })
            }
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

fn take_string(obj: &mut Map<String, Value>, key: &str) -> Option<String> {
    match obj.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Everything the server sends as a typed JSON text frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    InfoList {
        #[serde(flatten)]
        catalog: CatalogSnapshot,
        #[serde(flatten)]
        enumerations: Enumerations,
    },
    Pong {
        value: Value,
    },
    CheckExistsStatus {
        file: String,
        exists: bool,
    },
    UploadAck {
        file: String,
    },
    FileUploadSkip {
        file: String,
    },
    FileUploadSuccess {
        file: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        workflow_id: Option<String>,
    },
    WorkflowAwait {
        id: JobId,
        workflow_id: String,
        before_this: usize,
    },
    WorkflowStart {
        id: JobId,
        workflow_id: String,
    },
    WorkflowStatus {
        id: JobId,
        workflow_id: String,
        node_id: String,
        node_name: String,
        progress: u64,
        total: u64,
    },
    WorkflowFinished {
        id: JobId,
        workflow_id: String,
        error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        cancelled: bool,
    },
    /// Header announcing the binary frame that follows.
    File {
        id: JobId,
        workflow_id: String,
        data_type: String,
        action: Value,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            workflow_id: None,
        }
    }

    pub fn finished_ok(id: JobId, workflow_id: &str) -> Self {
        Self::WorkflowFinished {
            id,
            workflow_id: workflow_id.to_string(),
            error: false,
            error_message: None,
            cancelled: false,
        }
    }

    pub fn finished_err(id: JobId, workflow_id: &str, message: impl Into<String>) -> Self {
        Self::WorkflowFinished {
            id,
            workflow_id: workflow_id.to_string(),
            error: true,
            error_message: Some(message.into()),
            cancelled: false,
        }
    }

    pub fn cancelled(id: JobId, workflow_id: &str, message: impl Into<String>) -> Self {
        Self::WorkflowFinished {
            id,
            workflow_id: workflow_id.to_string(),
            error: true,
            error_message: Some(message.into()),
            cancelled: true,
        }
    }
}
