//! Client-facing projections of model and LoRA descriptors.
//!
//! Raw descriptors may carry server-side paths and private notes; only the
//! fields listed on [`ModelSummary`] and [`LoraSummary`] are ever served.

use serde::Serialize;
use serde_json::Value;

/// Reference asset families served in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Model,
    Lora,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub id: Value,
    pub file: Value,
    pub vae_file: Value,
    pub clip_file: Value,
    pub clip_type: Value,
    pub name: Value,
    pub group: Value,
    pub family: Value,
    pub context: Value,
    pub is_diffusion_model: Value,
    pub diffusion_model_weight_dtype: Value,
    pub description: Value,
    pub default_cfg: Value,
    pub default_steps: Value,
    pub default_sampler: Value,
    pub default_scheduler: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoraSummary {
    pub id: Value,
    pub file: Value,
    pub name: Value,
    pub context: Value,
    pub description: Value,
    pub default_strength: Value,
    pub limit_to_model: Value,
    pub limit_to_family: Value,
    pub limit_to_group: Value,
    pub use_loader_model_only: Value,
}

impl ModelSummary {
    pub fn project(raw: &Value, overlay: Option<&Value>) -> Self {
        Self {
            id: field(raw, "id"),
            file: field(raw, "file"),
            vae_file: field(raw, "vae_file"),
            clip_file: field(raw, "clip_file"),
            clip_type: field(raw, "clip_type"),
            name: localized(raw, overlay, "name", Value::Null),
            group: field(raw, "group"),
            family: field(raw, "family"),
            context: field(raw, "context"),
            is_diffusion_model: field(raw, "is_diffusion_model"),
            diffusion_model_weight_dtype: field_or(
                raw,
                "diffusion_model_weight_dtype",
                Value::String("default".into()),
            ),
            description: localized(raw, overlay, "description", Value::String(String::new())),
            default_cfg: field(raw, "default_cfg"),
            default_steps: field(raw, "default_steps"),
            default_sampler: field(raw, "default_sampler"),
            default_scheduler: field(raw, "default_scheduler"),
        }
    }
}

impl LoraSummary {
    pub fn project(raw: &Value, overlay: Option<&Value>) -> Self {
        Self {
            id: field(raw, "id"),
            file: field(raw, "file"),
            name: localized(raw, overlay, "name", Value::Null),
            context: field(raw, "context"),
            description: localized(raw, overlay, "description", Value::String(String::new())),
            default_strength: field(raw, "default_strength"),
            limit_to_model: field(raw, "limit_to_model"),
            limit_to_family: field(raw, "limit_to_family"),
            limit_to_group: field(raw, "limit_to_group"),
            use_loader_model_only: field_or(raw, "use_loader_model_only", Value::Bool(false)),
        }
    }
}

/// Project a raw descriptor of `kind` into its client-facing JSON.
pub fn project_asset(kind: AssetKind, raw: &Value, overlay: Option<&Value>) -> Value {
    let projected = match kind {
        AssetKind::Model => serde_json::to_value(ModelSummary::project(raw, overlay)),
        AssetKind::Lora => serde_json::to_value(LoraSummary::project(raw, overlay)),
    };
    projected.unwrap_or(Value::Null)
}

// ---- private helpers ----

fn field(raw: &Value, key: &str) -> Value {
    raw.get(key).cloned().unwrap_or(Value::Null)
}

fn field_or(raw: &Value, key: &str, default: Value) -> Value {
    raw.get(key).cloned().unwrap_or(default)
}

fn localized(raw: &Value, overlay: Option<&Value>, key: &str, default: Value) -> Value {
    overlay
        .and_then(|o| o.get(key))
        .or_else(|| raw.get(key))
        .cloned()
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_projection_drops_private_fields_and_fills_defaults() {
        let raw = json!({
            "id": "sdxl", "file": "sdxl.safetensors", "name": "SDXL",
            "family": "sdxl", "context": "image", "is_diffusion_model": false,
            "path": "/srv/models/sdxl.safetensors", "notes": "internal"
        });
        let projected = project_asset(AssetKind::Model, &raw, None);
        assert_eq!(projected["name"], "SDXL");
        assert_eq!(projected["diffusion_model_weight_dtype"], "default");
        assert_eq!(projected["description"], "");
        assert!(projected.get("path").is_none());
        assert!(projected.get("notes").is_none());
    }

    #[test]
    fn overlay_only_touches_name_and_description() {
        let raw = json!({"id": "detail", "file": "detail.safetensors", "name": "Detail"});
        let overlay = json!({"name": "Detalle", "file": "other.safetensors"});
        let projected = project_asset(AssetKind::Lora, &raw, Some(&overlay));
        assert_eq!(projected["name"], "Detalle");
        assert_eq!(projected["file"], "detail.safetensors");
        assert_eq!(projected["use_loader_model_only"], false);
    }
}
