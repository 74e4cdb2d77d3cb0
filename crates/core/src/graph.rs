//! Typed job graph model.
//!
//! Templates are stored in the engine's API format: a JSON object mapping
//! node ids to `{"class_type": ..., "inputs": {...}, ...}`. Only a handful
//! of node kinds matter to the broker (the controller, parameter exposures,
//! run conditions, and side-effecting actions); every other node and every
//! unknown field is carried through unchanged.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Class type names
// ---------------------------------------------------------------------------

/// The node that registers a graph as a runnable template.
pub const CONTROLLER_CLASS: &str = "AIHubWorkflowController";

/// Client-side run condition attached to a template.
pub const RUN_CONDITION_CLASS: &str = "AIHubAddRunCondition";

/// Prefix shared by every parameter exposure node.
pub const EXPOSE_PREFIX: &str = "AIHubExpose";

/// Prefixes of side-effecting action nodes (always executed).
pub const ACTION_PREFIXES: [&str; 2] = ["AIHubAction", "AIHubPatchAction"];

// ---------------------------------------------------------------------------
// Parameter kinds
// ---------------------------------------------------------------------------

/// How a parameter value is validated and injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    /// Integer with fixed bounds `1..=150` unless the node declares its own.
    Steps,
    /// Non-negative 64-bit integer.
    Seed,
    Float,
    /// Float with fixed bounds `0..=100`.
    Cfg,
    Boolean,
    String,
    StringSelection,
    /// Membership in the engine's sampler list.
    Sampler,
    /// Membership in the engine's scheduler list.
    Scheduler,
    /// A single staged file (`local_file`).
    File,
    /// An ordered list of staged files (`local_files`).
    FileList,
    /// Object-valued input consumed whole by the node (model pickers etc).
    Structured,
    /// An exposure this broker does not know; value passed through.
    Opaque,
}

impl ParamKind {
    /// Classify an `AIHubExpose*` class type.
    ///
    /// Returns `None` when `class_type` is not an exposure at all.
    pub fn from_class_type(class_type: &str) -> Option<Self> {
        let suffix = class_type.strip_prefix(EXPOSE_PREFIX)?;
        let kind = match suffix {
            "Integer" | "ProjectConfigInteger" => Self::Integer,
            "Steps" => Self::Steps,
            "Seed" => Self::Seed,
            "Float" | "ProjectConfigFloat" => Self::Float,
            "Cfg" => Self::Cfg,
            "Boolean" | "ProjectConfigBoolean" => Self::Boolean,
            "String" | "ProjectConfigString" => Self::String,
            "StringSelection" => Self::StringSelection,
            "Sampler" => Self::Sampler,
            "Scheduler" => Self::Scheduler,
            "Image" | "Video" | "Audio" | "Frame" | "ProjectImage" | "ProjectText"
            | "ProjectVideo" | "ProjectAudio" | "ProjectLatent" => Self::File,
            "ImageBatch" | "ProjectImageBatch" => Self::FileList,
            "Model" | "ModelSimple" | "ImageInfoOnly" | "ExtendableScheduler" => {
                Self::Structured
            }
            _ => Self::Opaque,
        };
        Some(kind)
    }

    /// Whether values of this kind refer to staged files.
    pub fn is_file(self) -> bool {
        matches!(self, Self::File | Self::FileList)
    }
}

/// The role a node plays from the broker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Controller,
    Parameter(ParamKind),
    RunCondition,
    Action,
    Opaque,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// One node of a job graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Everything else (`_meta`, editor hints) passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphNode {
    pub fn role(&self) -> NodeRole {
        let class_type = self.class_type.as_str();
        if class_type == CONTROLLER_CLASS {
            NodeRole::Controller
        } else if class_type == RUN_CONDITION_CLASS {
            NodeRole::RunCondition
        } else if ACTION_PREFIXES.iter().any(|p| class_type.starts_with(p)) {
            NodeRole::Action
        } else if let Some(kind) = ParamKind::from_class_type(class_type) {
            NodeRole::Parameter(kind)
        } else {
            NodeRole::Opaque
        }
    }

    /// Display name: `_meta.title`, else the class type.
    pub fn title(&self) -> &str {
        self.extra
            .get("_meta")
            .and_then(|meta| meta.get("title"))
            .and_then(Value::as_str)
            .unwrap_or(&self.class_type)
    }

    /// A string input, if present and literal.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(Value::as_str)
    }

    /// A boolean input, if present and literal.
    pub fn input_bool(&self, key: &str) -> Option<bool> {
        self.inputs.get(key).and_then(Value::as_bool)
    }
}

/// A complete job graph in node-id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGraph {
    nodes: IndexMap<String, GraphNode>,
}

impl JobGraph {
    /// Parse a graph from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        serde_json::from_value(value)
            .map_err(|e| CoreError::Catalog(format!("Invalid job graph: {e}")))
    }

    pub fn to_value(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::Internal(format!("Failed to encode job graph: {e}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &GraphNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Display name for a node, `"Unknown"` if the id is not in the graph.
    pub fn node_title(&self, node_id: &str) -> String {
        self.node(node_id)
            .map(|n| n.title().to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Ids of every side-effecting action node, in graph order.
    ///
    /// The engine must execute these regardless of whether anything
    /// consumes their outputs.
    pub fn output_node_ids(&self) -> Vec<String> {
        self.nodes()
            .filter(|(_, node)| node.role() == NodeRole::Action)
            .map(|(id, _)| id.to_string())
            .collect()
    }
}
