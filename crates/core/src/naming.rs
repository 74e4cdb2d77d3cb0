//! Staged file name rules.
//!
//! Every file a client refers to (uploads, existence checks, file
//! parameters) lives directly inside that client's private staging
//! directory. Names are restricted to a conservative character set so a
//! value can never escape the directory.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Characters allowed in a staged file name.
const STAGED_NAME_PATTERN: &str = r"^[0-9A-Za-z_.\-]+$";

/// Maximum length of a staged file name.
pub const MAX_STAGED_NAME_LEN: usize = 255;

static STAGED_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(STAGED_NAME_PATTERN).expect("valid regex"));

/// Check a client-supplied staged file name without touching the filesystem.
///
/// Rejects empty names, names longer than [`MAX_STAGED_NAME_LEN`], any
/// path separator, any `..` sequence, and anything outside
/// `[0-9A-Za-z_.-]`.
pub fn validate_staged_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation("File name must not be empty".to_string()));
    }
    if name.len() > MAX_STAGED_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "File name must not exceed {MAX_STAGED_NAME_LEN} characters"
        )));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(CoreError::Validation(format!(
            "Invalid file name {name}, path separators and traversal sequences are not allowed"
        )));
    }
    if !STAGED_NAME_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid file name {name}, must be alphanumeric dots and dashes only"
        )));
    }
    Ok(())
}

/// Validate `name` and join it onto `staging_dir`.
pub fn staged_path(staging_dir: &Path, name: &str) -> Result<PathBuf, CoreError> {
    validate_staged_name(name)?;
    Ok(staging_dir.join(name))
}
