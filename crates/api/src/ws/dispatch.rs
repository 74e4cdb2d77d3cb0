//! Session protocol router.
//!
//! Turns one inbound frame into calls on the session, the resolver and
//! the broker, and queues the reply on the session's outbox. Protocol and
//! validation errors are answered with `ERROR` and never reach the broker.

use std::sync::Arc;

use aihub_core::error::CoreError;
use aihub_core::resolver::{resolve, ResolveContext, ResolvedJob};
use serde_json::{Map, Value};

use crate::engine::broker::QueuedJob;
use crate::session::{Session, UploadDecision};
use crate::state::AppState;
use crate::ws::manager::SessionOutbox;
use crate::ws::messages::{ClientMessage, ServerMessage};

/// Handle one inbound text frame.
pub async fn handle_text(state: &AppState, session: &mut Session, outbox: &SessionOutbox, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(session_id = %session.id(), error = %e, "Rejected client message");
            outbox.send(&ServerMessage::error(e.to_string()));
            return;
        }
    };

    let reply = match message {
        ClientMessage::Ping { value } => Some(ServerMessage::Pong { value }),
        ClientMessage::FileCheckExists { filename } => Some(match session.check_exists(&filename) {
            Ok(exists) => ServerMessage::CheckExistsStatus {
                file: filename,
                exists,
            },
            Err(e) => ServerMessage::error(e.to_string()),
        }),
        ClientMessage::FileUpload {
            filename,
            if_not_exists,
        } => Some(match session.announce_upload(&filename, if_not_exists) {
            Ok(UploadDecision::Ready(file)) => ServerMessage::UploadAck { file },
            Ok(UploadDecision::Skip(file)) => ServerMessage::FileUploadSkip { file },
            Err(e) => ServerMessage::error(e.to_string()),
        }),
        ClientMessage::Cancel { job_id } => {
            let outcome = state.broker.cancel(session.id(), job_id).await;
            tracing::debug!(session_id = %session.id(), job_id = %job_id, ?outcome, "Cancel handled");
            None
        }
        ClientMessage::Submit {
            workflow_id,
            expose,
        } => submit(state, session, outbox, workflow_id, expose).await,
    };

    if let Some(reply) = reply {
        outbox.send(&reply);
    }
}

/// Handle one inbound binary frame (the payload of an announced upload).
pub async fn handle_binary(session: &mut Session, outbox: &SessionOutbox, data: &[u8]) {
    let reply = match session.receive_upload(data).await {
        Ok(file) => ServerMessage::FileUploadSuccess { file },
        Err(e) => ServerMessage::error(e.to_string()),
    };
    outbox.send(&reply);
}

async fn submit(
    state: &AppState,
    session: &Session,
    outbox: &SessionOutbox,
    workflow_id: String,
    expose: Map<String, Value>,
) -> Option<ServerMessage> {
    match resolve_submission(state, session, &workflow_id, expose).await {
        Ok(resolved) => {
            let job = QueuedJob::new(workflow_id, resolved.graph, resolved.outputs, outbox.clone());
            state.broker.enqueue(job).await;
            None
        }
        Err(message) => {
            tracing::info!(
                session_id = %session.id(),
                workflow_id = %workflow_id,
                error = %message,
                "Submission rejected",
            );
            Some(ServerMessage::Error {
                message,
                workflow_id: Some(workflow_id),
            })
        }
    }
}

/// Look up the template and resolve the parameters off the async runtime
/// (both touch the filesystem).
async fn resolve_submission(
    state: &AppState,
    session: &Session,
    workflow_id: &str,
    expose: Map<String, Value>,
) -> Result<ResolvedJob, String> {
    let catalog = Arc::clone(&state.catalog);
    let enumerations = state.enumerations.read().await.clone();
    let staging_dir = session.staging_dir().to_path_buf();
    let workflow_id = workflow_id.to_string();

    let resolved = tokio::task::spawn_blocking(move || {
        let template = catalog.get_template(&workflow_id)?;
        let ctx = ResolveContext {
            staging_dir: &staging_dir,
            enumerations: &enumerations,
        };
        resolve(&template, &ctx, &expose)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Resolver task failed");
        "Internal error while resolving workflow".to_string()
    })?;

    resolved.map_err(|e| match e {
        CoreError::NotFound { .. } => "Invalid workflow_id".to_string(),
        CoreError::Validation(message) => message,
        other => {
            tracing::error!(error = %other, "Unexpected resolver error");
            other.to_string()
        }
    })
}
