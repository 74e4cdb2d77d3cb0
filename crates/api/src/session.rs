//! Per-connection session state.
//!
//! A session owns a private staging directory for uploaded files and the
//! two-step upload handshake: a `FILE_UPLOAD` announcement names the file,
//! and exactly one binary frame after it carries the bytes.

use std::io;
use std::path::{Path, PathBuf};

use aihub_core::naming::staged_path;
use aihub_core::types::SessionId;

use crate::error::ProtocolError;

/// Subdirectory of the temp root that holds all staging directories.
const STAGING_ROOT: &str = "aihub-sessions";

/// Result of an upload announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDecision {
    /// The next binary frame will be stored under this name.
    Ready(String),
    /// The file is already staged; no binary frame is expected.
    Skip(String),
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    staging_dir: PathBuf,
    locale: Option<String>,
    pending_upload: Option<String>,
    persist: bool,
}

impl Session {
    /// Create a session and its staging directory under `temp_root`.
    pub fn create(temp_root: &Path, persist: bool, locale: Option<String>) -> io::Result<Self> {
        let id = SessionId::new_v4();
        let staging_dir = temp_root.join(STAGING_ROOT).join(id.to_string());
        std::fs::create_dir_all(&staging_dir)?;
        Ok(Self {
            id,
            staging_dir,
            locale,
            pending_upload: None,
            persist,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn pending_upload(&self) -> Option<&str> {
        self.pending_upload.as_deref()
    }

    /// Whether `name` is already staged as a regular file.
    pub fn check_exists(&self, name: &str) -> Result<bool, ProtocolError> {
        Ok(self.resolve(name)?.is_file())
    }

    /// Record an upload announcement.
    ///
    /// A new announcement replaces any earlier one that never received
    /// its payload.
    pub fn announce_upload(
        &mut self,
        name: &str,
        if_not_exists: bool,
    ) -> Result<UploadDecision, ProtocolError> {
        let path = self.resolve(name)?;
        if if_not_exists && path.is_file() {
            self.pending_upload = None;
            return Ok(UploadDecision::Skip(name.to_string()));
        }
        if let Some(previous) = self.pending_upload.replace(name.to_string()) {
            tracing::debug!(session_id = %self.id, previous = %previous, "Upload announcement replaced");
        }
        Ok(UploadDecision::Ready(name.to_string()))
    }

    /// Store a binary frame under the announced name.
    ///
    /// The announcement is consumed whether or not the write succeeds.
    pub async fn receive_upload(&mut self, data: &[u8]) -> Result<String, ProtocolError> {
        let name = self
            .pending_upload
            .take()
            .ok_or(ProtocolError::MissingUploadHeader)?;
        let path = self.resolve(&name)?;
        if let Err(e) = tokio::fs::write(&path, data).await {
            tracing::error!(session_id = %self.id, file = %name, error = %e, "Failed to store upload");
            return Err(ProtocolError::UploadFailed);
        }
        tracing::debug!(session_id = %self.id, file = %name, bytes = data.len(), "Upload stored");
        Ok(name)
    }

    /// Tear down the session, removing its staging directory unless
    /// persistence was requested.
    pub async fn close(self) {
        if self.persist {
            tracing::debug!(session_id = %self.id, dir = %self.staging_dir.display(), "Keeping staging directory");
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.staging_dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(session_id = %self.id, error = %e, "Failed to remove staging directory");
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, ProtocolError> {
        staged_path(&self.staging_dir, name)
            .map_err(|_| ProtocolError::InvalidFileName(name.to_string()))
    }
}
