//! Job templates extracted from authored graphs.
//!
//! A graph becomes a template when it carries exactly one controller node.
//! The controller supplies the template identity and human metadata; every
//! exposure node becomes a [`ParameterSpec`] whose constraints are read
//! from the node's own literal inputs.

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::graph::{JobGraph, NodeRole, ParamKind};

/// Node input keys a locale overlay may replace. Identifiers, defaults and
/// constraints are never touched.
pub const OVERLAY_TEXT_FIELDS: [&str; 8] = [
    "description",
    "name",
    "tooltip",
    "label",
    "options_label",
    "category",
    "metadata_fields_label",
    "error",
];

/// Bounds applied to steps exposures that do not declare their own.
pub const DEFAULT_STEPS_BOUNDS: (i128, i128) = (1, 150);

/// Bounds applied to cfg exposures.
pub const DEFAULT_CFG_BOUNDS: (f64, f64) = (0.0, 100.0);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Identity and human metadata from the controller node.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSpec {
    pub node_id: String,
    pub id: String,
    pub label: String,
    pub description: String,
    pub category: String,
    pub context: String,
    pub project_type: String,
    pub project_type_init: bool,
}

/// Validation constraints for one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraints {
    None,
    Integer { min: Option<i128>, max: Option<i128> },
    Float { min: Option<f64>, max: Option<f64> },
    /// Character count for strings, entry count for file lists.
    Length { min: Option<usize>, max: Option<usize> },
    Options(Vec<String>),
}

/// One client-adjustable input of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub id: String,
    pub kind: ParamKind,
    pub class_type: String,
    /// Nodes the resolved value is spliced into (usually exactly one).
    pub node_ids: Vec<String>,
    pub constraints: Constraints,
    /// Authored default; file kinds never carry one.
    pub default: Option<Value>,
    pub advanced: bool,
    pub index: i64,
}

/// An immutable, runnable job template.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub controller: ControllerSpec,
    pub parameters: Vec<ParameterSpec>,
    pub graph: JobGraph,
}

impl JobTemplate {
    /// Extract a template from an authored graph.
    ///
    /// Returns `Ok(None)` for graphs without a controller (unfinished
    /// authored content) and an error for graphs that are malformed.
    pub fn from_graph(graph: JobGraph) -> Result<Option<Self>, CoreError> {
        let controllers: Vec<&str> = graph
            .nodes()
            .filter(|(_, n)| n.role() == NodeRole::Controller)
            .map(|(id, _)| id)
            .collect();

        let controller_node_id = match controllers.as_slice() {
            [] => return Ok(None),
            [one] => one.to_string(),
            many => {
                return Err(CoreError::Catalog(format!(
                    "Graph declares {} controller nodes, expected exactly one",
                    many.len()
                )))
            }
        };

        let controller = parse_controller(&graph, &controller_node_id)?;
        let mut parameters: Vec<ParameterSpec> = Vec::new();

        for (node_id, node) in graph.nodes() {
            let NodeRole::Parameter(kind) = node.role() else {
                continue;
            };
            let id = node
                .input_str("id")
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    CoreError::Catalog(format!(
                        "Template {}: exposure node {node_id} is missing an id",
                        controller.id
                    ))
                })?;

            if let Some(existing) = parameters.iter_mut().find(|p| p.id == id) {
                if existing.kind != kind {
                    return Err(CoreError::Catalog(format!(
                        "Template {}: parameter {id} is exposed with conflicting kinds",
                        controller.id
                    )));
                }
                existing.node_ids.push(node_id.to_string());
                continue;
            }

            parameters.push(ParameterSpec {
                id: id.to_string(),
                kind,
                class_type: node.class_type.clone(),
                node_ids: vec![node_id.to_string()],
                constraints: constraints_for(kind, &node.inputs),
                default: if kind.is_file() {
                    None
                } else {
                    node.inputs
                        .get("value")
                        .or_else(|| node.inputs.get("default"))
                        .cloned()
                },
                advanced: node.input_bool("advanced").unwrap_or(false),
                index: node.inputs.get("index").and_then(Value::as_i64).unwrap_or(0),
            });
        }

        Ok(Some(Self {
            controller,
            parameters,
            graph,
        }))
    }

    pub fn id(&self) -> &str {
        &self.controller.id
    }

    pub fn parameter(&self, id: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.id == id)
    }

    /// The client-facing summary of this template.
    ///
    /// Shape: every controller input at the top level, plus
    /// `expose: {paramId: {type, data}}` and `conditions: [...]`.
    /// `overlay` maps node ids to replacement text fields.
    pub fn summary(&self, overlay: Option<&Value>) -> Value {
        let mut summary = Map::new();
        let mut expose = Map::new();
        let mut conditions = Vec::new();

        for (node_id, node) in self.graph.nodes() {
            let role = node.role();
            if !matches!(
                role,
                NodeRole::Controller | NodeRole::Parameter(_) | NodeRole::RunCondition
            ) {
                continue;
            }

            let mut data = node.inputs.clone();
            if let Some(patch) = overlay.and_then(|o| o.get(node_id)).and_then(Value::as_object) {
                apply_text_overlay(&mut data, patch);
            }

            match role {
                NodeRole::Controller => summary.extend(data),
                NodeRole::RunCondition => conditions.push(Value::Object(data)),
                NodeRole::Parameter(_) => {
                    let id = data
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let mut entry = Map::new();
                    entry.insert("type".into(), Value::String(node.class_type.clone()));
                    entry.insert("data".into(), Value::Object(data));
                    expose.insert(id, Value::Object(entry));
                }
                _ => {}
            }
        }

        summary.insert("expose".into(), Value::Object(expose));
        summary.insert("conditions".into(), Value::Array(conditions));
        Value::Object(summary)
    }
}

/// Replace the human-facing text fields of `data` with those in `patch`.
pub fn apply_text_overlay(data: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for field in OVERLAY_TEXT_FIELDS {
        if let Some(value) = patch.get(field) {
            data.insert(field.to_string(), value.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_controller(graph: &JobGraph, node_id: &str) -> Result<ControllerSpec, CoreError> {
    let node = graph
        .node(node_id)
        .ok_or_else(|| CoreError::Internal(format!("Controller node {node_id} vanished")))?;

    let id = node
        .input_str("id")
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CoreError::Catalog("Controller node is missing an id".to_string()))?;

    let text = |key: &str| node.input_str(key).unwrap_or_default().to_string();

    Ok(ControllerSpec {
        node_id: node_id.to_string(),
        id: id.to_string(),
        label: text("label"),
        description: text("description"),
        category: text("category"),
        context: text("context"),
        project_type: text("project_type"),
        project_type_init: node.input_bool("project_type_init").unwrap_or(false),
    })
}

fn int_input(inputs: &Map<String, Value>, key: &str) -> Option<i128> {
    let value = inputs.get(key)?;
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
}

fn len_input(inputs: &Map<String, Value>, key: &str) -> Option<usize> {
    inputs
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

fn constraints_for(kind: ParamKind, inputs: &Map<String, Value>) -> Constraints {
    match kind {
        ParamKind::Integer => Constraints::Integer {
            min: int_input(inputs, "min"),
            max: int_input(inputs, "max"),
        },
        ParamKind::Steps => Constraints::Integer {
            min: Some(int_input(inputs, "min").unwrap_or(DEFAULT_STEPS_BOUNDS.0)),
            max: Some(int_input(inputs, "max").unwrap_or(DEFAULT_STEPS_BOUNDS.1)),
        },
        ParamKind::Seed => Constraints::Integer {
            min: Some(0),
            max: Some(i128::from(u64::MAX)),
        },
        ParamKind::Float => Constraints::Float {
            min: inputs.get("min").and_then(Value::as_f64),
            max: inputs.get("max").and_then(Value::as_f64),
        },
        ParamKind::Cfg => Constraints::Float {
            min: Some(DEFAULT_CFG_BOUNDS.0),
            max: Some(DEFAULT_CFG_BOUNDS.1),
        },
        ParamKind::String | ParamKind::FileList => Constraints::Length {
            min: len_input(inputs, "minlen"),
            max: len_input(inputs, "maxlen"),
        },
        ParamKind::StringSelection => Constraints::Options(
            inputs
                .get("options")
                .and_then(Value::as_str)
                .map(|options| {
                    options
                        .split('\n')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        ),
        _ => Constraints::None,
    }
}
