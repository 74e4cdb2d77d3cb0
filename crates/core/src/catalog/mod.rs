//! Metadata catalog: templates and reference assets with locale overlays.
//!
//! In [`CacheMode::Cold`] each view is computed once per set of overlay
//! directories a locale resolves to, and then served from memory for the
//! life of the process. Locales with no overlay share the default entry. In [`CacheMode::Hot`]
//! the store is re-read on every query. Both modes produce identical
//! output for an unchanged store.
//!
//! All operations touch the filesystem and are blocking; async callers
//! should run them on a blocking thread.

pub mod assets;
pub mod locale;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::graph::JobGraph;
use crate::template::JobTemplate;

pub use assets::AssetKind;
use locale::requested_locale;
pub use store::{CatalogStore, StoreKind};

/// Parsed templates keyed by template id.
pub type TemplateIndex = BTreeMap<String, Arc<JobTemplate>>;

/// Template summaries keyed by template id.
pub type TemplateSummaries = BTreeMap<String, Value>;

/// Overlay directories a requested locale resolves to; empty for none.
type OverlayKey = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Load once, serve forever.
    Cold,
    /// Reload on every query.
    Hot,
}

/// Everything a freshly connected client needs, for one locale.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub workflows: Arc<TemplateSummaries>,
    pub models: Arc<Vec<Value>>,
    pub loras: Arc<Vec<Value>>,
}

pub struct MetadataCatalog {
    store: CatalogStore,
    mode: CacheMode,
    templates: RwLock<Option<Arc<TemplateIndex>>>,
    summaries: RwLock<HashMap<OverlayKey, Arc<TemplateSummaries>>>,
    assets: RwLock<HashMap<(AssetKind, OverlayKey), Arc<Vec<Value>>>>,
}

impl MetadataCatalog {
    pub fn new(store: CatalogStore, mode: CacheMode) -> Self {
        Self {
            store,
            mode,
            templates: RwLock::new(None),
            summaries: RwLock::new(HashMap::new()),
            assets: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Summaries of every valid template, overlaid for `locale`.
    pub fn list_templates(&self, locale: Option<&str>) -> Arc<TemplateSummaries> {
        let locale = requested_locale(locale);
        let key = self.overlay_key(StoreKind::Workflows, locale.as_deref());

        if let Some(cached) = self.cached(&self.summaries, &key) {
            return cached;
        }

        let summaries: TemplateSummaries = self
            .templates()
            .iter()
            .map(|(id, template)| {
                let overlay = locale
                    .as_deref()
                    .and_then(|l| self.store.read_overlay(StoreKind::Workflows, id, l));
                (id.clone(), template.summary(overlay.as_ref()))
            })
            .collect();

        self.remember(&self.summaries, key, Arc::new(summaries))
    }

    /// Client-facing projections of one asset family, overlaid for `locale`.
    pub fn list_assets(&self, kind: AssetKind, locale: Option<&str>) -> Arc<Vec<Value>> {
        let locale = requested_locale(locale);
        let store_kind = match kind {
            AssetKind::Model => StoreKind::Models,
            AssetKind::Lora => StoreKind::Loras,
        };
        let key = (kind, self.overlay_key(store_kind, locale.as_deref()));

        if let Some(cached) = self.cached(&self.assets, &key) {
            return cached;
        }

        let entries: Vec<Value> = self
            .store
            .read_entries(store_kind)
            .into_iter()
            .map(|entry| {
                let overlay = match (locale.as_deref(), entry.value.get("id").and_then(Value::as_str)) {
                    (Some(l), Some(id)) => self.store.read_overlay(store_kind, id, l),
                    _ => None,
                };
                assets::project_asset(kind, &entry.value, overlay.as_ref())
            })
            .collect();

        self.remember(&self.assets, key, Arc::new(entries))
    }

    /// Look up a runnable template by id.
    pub fn get_template(&self, id: &str) -> Result<Arc<JobTemplate>, CoreError> {
        self.templates()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "workflow",
                id: id.to_string(),
            })
    }

    pub fn snapshot(&self, locale: Option<&str>) -> CatalogSnapshot {
        CatalogSnapshot {
            workflows: self.list_templates(locale),
            models: self.list_assets(AssetKind::Model, locale),
            loras: self.list_assets(AssetKind::Lora, locale),
        }
    }

    // ---- private helpers ----

    /// Views for locales resolving to the same overlay directories are
    /// identical, so they share one cache entry.
    fn overlay_key(&self, kind: StoreKind, locale: Option<&str>) -> OverlayKey {
        locale
            .map(|l| self.store.overlay_locales(kind, l))
            .unwrap_or_default()
    }

    fn templates(&self) -> Arc<TemplateIndex> {
        if self.mode == CacheMode::Cold {
            let guard = self.templates.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(index) = guard.as_ref() {
                return Arc::clone(index);
            }
        }

        let index = Arc::new(self.load_templates());
        if self.mode == CacheMode::Cold {
            let mut guard = self.templates.write().unwrap_or_else(PoisonError::into_inner);
            // A concurrent loader may have won; keep the first frozen copy.
            return Arc::clone(guard.get_or_insert(index));
        }
        index
    }

    fn load_templates(&self) -> TemplateIndex {
        let mut index = TemplateIndex::new();

        for entry in self.store.read_entries(StoreKind::Workflows) {
            let graph = match JobGraph::from_value(entry.value) {
                Ok(graph) => graph,
                Err(e) => {
                    tracing::warn!(file = %entry.file_name, error = %e, "Skipping workflow");
                    continue;
                }
            };
            let template = match JobTemplate::from_graph(graph) {
                Ok(Some(template)) => template,
                Ok(None) => {
                    tracing::debug!(file = %entry.file_name, "Workflow has no controller, not listed");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(file = %entry.file_name, error = %e, "Skipping workflow");
                    continue;
                }
            };

            let id = template.id().to_string();
            if index.insert(id.clone(), Arc::new(template)).is_some() {
                tracing::warn!(
                    workflow_id = %id,
                    file = %entry.file_name,
                    "Duplicate workflow id, replacing previously loaded workflow",
                );
            }
        }

        tracing::info!(count = index.len(), "Workflows loaded");
        index
    }

    fn cached<K, V>(&self, cache: &RwLock<HashMap<K, Arc<V>>>, key: &K) -> Option<Arc<V>>
    where
        K: std::hash::Hash + Eq,
    {
        if self.mode != CacheMode::Cold {
            return None;
        }
        cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remember<K, V>(&self, cache: &RwLock<HashMap<K, Arc<V>>>, key: K, value: Arc<V>) -> Arc<V>
    where
        K: std::hash::Hash + Eq,
    {
        if self.mode != CacheMode::Cold {
            return value;
        }
        let mut guard = cache.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(guard.entry(key).or_insert(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, rel: &str, value: &Value) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
    }

    fn workflow(id: &str, label: &str) -> Value {
        json!({
            "1": {"class_type": "AIHubWorkflowController", "inputs": {"id": id, "label": label}},
            "2": {"class_type": "AIHubExposeSteps", "inputs": {"id": "steps", "label": "Steps", "value": 20}}
        })
    }

    fn seeded_store() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "workflows/a.json", &workflow("txt2img", "Text to image"));
        write(root, "workflows/b.json", &json!({"1": {"class_type": "KSampler", "inputs": {}}}));
        write(root, "workflows/locale/pt/txt2img.json", &json!({"1": {"label": "Texto para imagem"}}));
        write(root, "models/sdxl.json", &json!({"id": "sdxl", "name": "SDXL", "path": "/secret"}));
        write(root, "loras/detail.json", &json!({"id": "detail", "name": "Detail"}));
        dir
    }

    #[test]
    fn lists_only_templates_with_controller() {
        let dir = seeded_store();
        let catalog = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Hot);
        let templates = catalog.list_templates(None);
        assert_eq!(templates.keys().collect::<Vec<_>>(), vec!["txt2img"]);
        assert_eq!(templates["txt2img"]["label"], "Text to image");
    }

    #[test]
    fn locale_falls_back_to_primary_then_default_text() {
        let dir = seeded_store();
        let catalog = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Hot);

        let pt_br = catalog.list_templates(Some("pt-BR"));
        assert_eq!(pt_br["txt2img"]["label"], "Texto para imagem");

        let fr = catalog.list_templates(Some("fr_fr"));
        assert_eq!(fr["txt2img"]["label"], "Text to image");
    }

    #[test]
    fn duplicate_ids_last_file_wins() {
        let dir = seeded_store();
        write(dir.path(), "workflows/c.json", &workflow("txt2img", "Second"));
        let catalog = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Hot);
        assert_eq!(catalog.list_templates(None)["txt2img"]["label"], "Second");
    }

    #[test]
    fn get_template_unknown_is_not_found() {
        let dir = seeded_store();
        let catalog = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Cold);
        assert!(catalog.get_template("txt2img").is_ok());
        assert_matches!(
            catalog.get_template("nope"),
            Err(CoreError::NotFound { entity: "workflow", .. })
        );
    }

    #[test]
    fn cold_mode_is_frozen_and_hot_mode_reloads() {
        let dir = seeded_store();
        let cold = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Cold);
        let hot = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Hot);

        let first = serde_json::to_string(&cold.snapshot(Some("pt"))).unwrap();
        assert_eq!(first, serde_json::to_string(&hot.snapshot(Some("pt"))).unwrap());

        write(dir.path(), "workflows/a.json", &workflow("txt2img", "Changed"));

        let second = serde_json::to_string(&cold.snapshot(Some("pt"))).unwrap();
        assert_eq!(first, second);
        assert_eq!(cold.list_templates(None)["txt2img"]["label"], "Text to image");
        assert_eq!(hot.list_templates(None)["txt2img"]["label"], "Changed");
    }

    #[test]
    fn cold_cache_shares_entries_between_equivalent_locales() {
        let dir = seeded_store();
        let catalog = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Cold);

        let zz = catalog.snapshot(Some("zz-1"));
        let yy = catalog.snapshot(Some("yy-2"));
        let default = catalog.snapshot(None);
        assert!(Arc::ptr_eq(&zz.workflows, &yy.workflows));
        assert!(Arc::ptr_eq(&zz.workflows, &default.workflows));
        assert!(Arc::ptr_eq(&zz.models, &default.models));

        let pt_br = catalog.list_templates(Some("pt-BR"));
        let pt = catalog.list_templates(Some("pt"));
        assert!(Arc::ptr_eq(&pt_br, &pt));
        assert_eq!(pt["txt2img"]["label"], "Texto para imagem");

        assert_eq!(catalog.summaries.read().unwrap().len(), 2);
        assert_eq!(catalog.assets.read().unwrap().len(), 2);
    }

    #[test]
    fn assets_are_projected() {
        let dir = seeded_store();
        let catalog = MetadataCatalog::new(CatalogStore::new(dir.path()), CacheMode::Cold);
        let models = catalog.list_assets(AssetKind::Model, None);
        assert_eq!(models.len(), 1);
        assert!(models[0].get("path").is_none());
        assert_eq!(catalog.list_assets(AssetKind::Lora, None)[0]["name"], "Detail");
    }
}
