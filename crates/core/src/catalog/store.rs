//! Read-only access to the on-disk descriptor store.
//!
//! Layout under the store root:
//!
//! ```text
//! workflows/<any>.json                 job graphs
//! workflows/locale/<locale>/<id>.json  per-node text overlays
//! models/<any>.json, models/locale/... model descriptors
//! loras/<any>.json,  loras/locale/...  LoRA descriptors
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::locale::locale_candidates;
use crate::naming::validate_staged_name;

/// One descriptor directory of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Workflows,
    Models,
    Loras,
}

impl StoreKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Workflows => "workflows",
            Self::Models => "models",
            Self::Loras => "loras",
        }
    }
}

/// A descriptor file that parsed as JSON.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub file_name: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: PathBuf,
}

impl CatalogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: StoreKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Read every `*.json` file directly inside the kind's directory, in
    /// file name order. Unreadable or unparseable files are logged and
    /// skipped. A missing directory is an empty store.
    pub fn read_entries(&self, kind: StoreKind) -> Vec<StoreEntry> {
        let dir = self.dir(kind);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot list descriptor directory");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        tracing::debug!(dir = %dir.display(), count = paths.len(), "Loading descriptors");

        paths
            .into_iter()
            .filter_map(|path| {
                let value = read_json(&path)?;
                let file_name = path.file_name()?.to_string_lossy().into_owned();
                Some(StoreEntry { file_name, value })
            })
            .collect()
    }

    /// Overlay directories that exist for `locale`, most specific first.
    /// Empty when no overlay applies.
    pub fn overlay_locales(&self, kind: StoreKind, locale: &str) -> Vec<String> {
        if validate_staged_name(locale).is_err() {
            return Vec::new();
        }
        let locale_root = self.dir(kind).join("locale");
        locale_candidates(locale)
            .into_iter()
            .filter(|candidate| locale_root.join(candidate).is_dir())
            .collect()
    }

    /// Find the overlay for `id` in the given normalised locale, falling
    /// back to the primary subtag. Returns `None` when neither exists.
    pub fn read_overlay(&self, kind: StoreKind, id: &str, locale: &str) -> Option<Value> {
        // Ids come from authored files; refuse anything that would leave the locale dir.
        if validate_staged_name(id).is_err() || validate_staged_name(locale).is_err() {
            return None;
        }
        let locale_root = self.dir(kind).join("locale");
        locale_candidates(locale)
            .into_iter()
            .map(|candidate| locale_root.join(candidate).join(format!("{id}.json")))
            .find(|path| path.is_file())
            .and_then(|path| read_json(&path))
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read descriptor");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping unparseable descriptor");
            None
        }
    }
}
