//! Parameter resolution: template + untrusted client values -> runnable job.
//!
//! Resolution is two-phase. Every parameter is validated first and turned
//! into a set of node input patches; only when all of them pass is the
//! template graph cloned and patched. A failure never yields a partial
//! graph, and the template's own graph is never mutated.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::engine::Enumerations;
use crate::error::CoreError;
use crate::graph::{JobGraph, ParamKind};
use crate::naming::staged_path;
use crate::template::{Constraints, JobTemplate, ParameterSpec};

/// Keys a client may attach next to `local_file`/`local_files`.
pub const FILE_EXTRA_KEYS: [&str; 10] = [
    "pos_x",
    "pos_y",
    "layer_id",
    "segment_id",
    "frame",
    "total_frames",
    "frame_index",
    "value_width",
    "value_height",
    "metadata",
];

const LOCAL_FILE: &str = "local_file";
const LOCAL_FILES: &str = "local_files";

/// Per-submission inputs the resolver needs besides the template.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// The submitting session's staging directory.
    pub staging_dir: &'a Path,
    /// Known sampler/scheduler names; empty lists disable membership checks.
    pub enumerations: &'a Enumerations,
}

/// A fully resolved job.
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub graph: JobGraph,
    pub outputs: Vec<String>,
}

/// Validate `params` against `template` and produce a concrete job graph.
///
/// Every parameter the template declares must be present in `params`.
/// Keys in `params` that the template does not declare are ignored.
pub fn resolve(
    template: &JobTemplate,
    ctx: &ResolveContext<'_>,
    params: &Map<String, Value>,
) -> Result<ResolvedJob, CoreError> {
    let mut patches: Vec<(&ParameterSpec, Map<String, Value>)> =
        Vec::with_capacity(template.parameters.len());

    for spec in &template.parameters {
        let value = params.get(&spec.id).ok_or_else(|| {
            CoreError::Validation(format!("Missing parameter for expose id {}", spec.id))
        })?;
        patches.push((spec, patch_for(spec, ctx, value)?));
    }

    let mut graph = template.graph.clone();
    for (spec, patch) in patches {
        for node_id in &spec.node_ids {
            let node = graph.node_mut(node_id).ok_or_else(|| {
                CoreError::Internal(format!(
                    "Template {} lost node {node_id} for parameter {}",
                    template.id(),
                    spec.id
                ))
            })?;
            node.inputs
                .extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    let outputs = graph.output_node_ids();
    Ok(ResolvedJob { graph, outputs })
}

// ---------------------------------------------------------------------------
// Per-kind patches
// ---------------------------------------------------------------------------

fn patch_for(
    spec: &ParameterSpec,
    ctx: &ResolveContext<'_>,
    value: &Value,
) -> Result<Map<String, Value>, CoreError> {
    match spec.kind {
        ParamKind::File => file_patch(spec, ctx.staging_dir, value),
        ParamKind::FileList => file_list_patch(spec, ctx.staging_dir, value),
        ParamKind::Structured | ParamKind::Opaque => passthrough_patch(spec, value),
        _ => scalar_patch(spec, ctx.enumerations, value),
    }
}

fn file_patch(
    spec: &ParameterSpec,
    staging_dir: &Path,
    value: &Value,
) -> Result<Map<String, Value>, CoreError> {
    let object = value
        .as_object()
        .filter(|o| o.contains_key(LOCAL_FILE))
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "Invalid parameter for expose id {}, must be an object with a local_file property",
                spec.id
            ))
        })?;

    let mut patch = file_extras(object);
    let resolved = match &object[LOCAL_FILE] {
        Value::Null => Value::Null,
        name => Value::String(resolve_staged_file(spec, staging_dir, name)?),
    };
    patch.insert(LOCAL_FILE.to_string(), resolved);
    Ok(patch)
}

fn file_list_patch(
    spec: &ParameterSpec,
    staging_dir: &Path,
    value: &Value,
) -> Result<Map<String, Value>, CoreError> {
    let object = value
        .as_object()
        .filter(|o| o.contains_key(LOCAL_FILES))
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "Invalid parameter for expose id {}, must be an object with a local_files property",
                spec.id
            ))
        })?;

    let names = object[LOCAL_FILES].as_array().ok_or_else(|| {
        CoreError::Validation(format!(
            "Invalid local_files value for expose id {}, must be a list of file names",
            spec.id
        ))
    })?;

    if let Constraints::Length { min, max } = spec.constraints {
        check_count(spec, names.len(), min, max)?;
    }

    let paths = names
        .iter()
        .map(|name| resolve_staged_file(spec, staging_dir, name))
        .collect::<Result<Vec<_>, _>>()?;

    // The consuming node expects a JSON-encoded list, not an array input.
    let encoded = serde_json::to_string(&paths)
        .map_err(|e| CoreError::Internal(format!("Failed to encode file list: {e}")))?;

    let mut patch = file_extras(object);
    patch.insert(LOCAL_FILES.to_string(), Value::String(encoded));
    Ok(patch)
}

fn passthrough_patch(spec: &ParameterSpec, value: &Value) -> Result<Map<String, Value>, CoreError> {
    match value {
        Value::Object(object) => {
            reject_file_keys(spec, object)?;
            Ok(object.clone())
        }
        bare => Ok(value_patch(bare.clone())),
    }
}

fn scalar_patch(
    spec: &ParameterSpec,
    enumerations: &Enumerations,
    value: &Value,
) -> Result<Map<String, Value>, CoreError> {
    match value {
        Value::Object(object) => {
            reject_file_keys(spec, object)?;
            let inner = object.get("value").ok_or_else(|| {
                invalid(format!(
                    "Invalid parameter for expose id {}, must be an object with a value property",
                    spec.id
                ))
            })?;
            check_scalar(spec, enumerations, inner)?;
            Ok(object.clone())
        }
        bare => {
            check_scalar(spec, enumerations, bare)?;
            Ok(value_patch(bare.clone()))
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn check_scalar(
    spec: &ParameterSpec,
    enumerations: &Enumerations,
    value: &Value,
) -> Result<(), CoreError> {
    let id = &spec.id;
    match spec.kind {
        ParamKind::Integer | ParamKind::Steps | ParamKind::Seed => {
            let n = value
                .as_i64()
                .map(i128::from)
                .or_else(|| value.as_u64().map(i128::from))
                .ok_or_else(|| invalid(format!("Parameter {id} must be an integer")))?;
            if let Constraints::Integer { min, max } = spec.constraints {
                if let Some(min) = min.filter(|min| n < *min) {
                    return Err(invalid(format!("Parameter {id} must be at least {min}, got {n}")));
                }
                if let Some(max) = max.filter(|max| n > *max) {
                    return Err(invalid(format!("Parameter {id} must be at most {max}, got {n}")));
                }
            }
        }
        ParamKind::Float | ParamKind::Cfg => {
            let n = value
                .as_f64()
                .filter(|n| n.is_finite())
                .ok_or_else(|| invalid(format!("Parameter {id} must be a number")))?;
            if let Constraints::Float { min, max } = spec.constraints {
                if let Some(min) = min.filter(|min| n < *min) {
                    return Err(invalid(format!("Parameter {id} must be at least {min}, got {n}")));
                }
                if let Some(max) = max.filter(|max| n > *max) {
                    return Err(invalid(format!("Parameter {id} must be at most {max}, got {n}")));
                }
            }
        }
        ParamKind::Boolean => {
            if !value.is_boolean() {
                return Err(invalid(format!("Parameter {id} must be a boolean")));
            }
        }
        ParamKind::String => {
            let s = expect_str(id, value)?;
            if let Constraints::Length { min, max } = spec.constraints {
                let len = s.chars().count();
                if let Some(min) = min.filter(|min| len < *min) {
                    return Err(invalid(format!(
                        "Parameter {id} must be at least {min} characters long"
                    )));
                }
                if let Some(max) = max.filter(|max| len > *max) {
                    return Err(invalid(format!(
                        "Parameter {id} must be at most {max} characters long"
                    )));
                }
            }
        }
        ParamKind::StringSelection => {
            let s = expect_str(id, value)?;
            if let Constraints::Options(options) = &spec.constraints {
                check_membership(id, s, options)?;
            }
        }
        ParamKind::Sampler => check_membership(id, expect_str(id, value)?, &enumerations.samplers)?,
        ParamKind::Scheduler => {
            check_membership(id, expect_str(id, value)?, &enumerations.schedulers)?
        }
        ParamKind::File | ParamKind::FileList | ParamKind::Structured | ParamKind::Opaque => {}
    }
    Ok(())
}

fn check_membership(id: &str, value: &str, options: &[String]) -> Result<(), CoreError> {
    if options.is_empty() || options.iter().any(|o| o == value) {
        return Ok(());
    }
    Err(invalid(format!(
        "Parameter {id} must be one of: {}",
        options.join(", ")
    )))
}

fn check_count(
    spec: &ParameterSpec,
    count: usize,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<(), CoreError> {
    if let Some(min) = min.filter(|min| count < *min) {
        return Err(invalid(format!(
            "Parameter {} requires at least {min} files, got {count}",
            spec.id
        )));
    }
    if let Some(max) = max.filter(|max| count > *max) {
        return Err(invalid(format!(
            "Parameter {} accepts at most {max} files, got {count}",
            spec.id
        )));
    }
    Ok(())
}

/// Validate a client file name and return the absolute staged path.
///
/// The name check runs before any filesystem access.
fn resolve_staged_file(
    spec: &ParameterSpec,
    staging_dir: &Path,
    name: &Value,
) -> Result<String, CoreError> {
    let bad_name = || {
        let shown = name.as_str().map_or_else(|| name.to_string(), String::from);
        invalid(format!(
            "Invalid local_file path for expose id {}, must be alphanumeric dots and dashes only not {shown}",
            spec.id
        ))
    };
    let name_str = name.as_str().ok_or_else(bad_name)?;
    let path: PathBuf = staged_path(staging_dir, name_str).map_err(|_| bad_name())?;

    if !path.is_file() {
        return Err(invalid(format!(
            "File not found for expose id {} at file {name_str}",
            spec.id
        )));
    }
    Ok(path.to_string_lossy().into_owned())
}

fn reject_file_keys(spec: &ParameterSpec, object: &Map<String, Value>) -> Result<(), CoreError> {
    if object.contains_key(LOCAL_FILE) || object.contains_key(LOCAL_FILES) {
        return Err(invalid(format!(
            "Invalid parameter for expose id {}, file references are not accepted for this parameter",
            spec.id
        )));
    }
    Ok(())
}

fn expect_str<'v>(id: &str, value: &'v Value) -> Result<&'v str, CoreError> {
    value
        .as_str()
        .ok_or_else(|| invalid(format!("Parameter {id} must be a string")))
}

fn file_extras(object: &Map<String, Value>) -> Map<String, Value> {
    object
        .iter()
        .filter(|(k, _)| FILE_EXTRA_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn value_patch(value: Value) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("value".to_string(), value);
    patch
}

fn invalid(message: String) -> CoreError {
    CoreError::Validation(message)
}
