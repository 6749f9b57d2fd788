use serde::{Deserialize, Serialize};
use thiserror::Error;
use xlpilot_types::FileId;

use crate::lenient;
use crate::operation::{Operation, OperationKind};

/// Binding id of the table operations target by default.
pub const PRIMARY_BINDING: &str = "main";

#[derive(Clone, Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("unknown operation type `{0}`")]
    UnknownKind(String),
    #[error("invalid parameters for {kind}: {message}")]
    InvalidParams { kind: OperationKind, message: String },
    #[error("operation {index}: {source}")]
    AtIndex {
        index: usize,
        #[source]
        source: Box<PlanError>,
    },
    #[error("plan contains no operations")]
    Empty,
}

/// A sheet of a bound file, addressable by `id` from operations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBinding {
    pub id: String,
    pub file_id: FileId,
    pub sheet: String,
}

/// An operation as the planner emits it: a free-form kind string and loose params.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOperation {
    #[serde(rename = "type", alias = "operation", alias = "op")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::opt_string"
    )]
    pub description: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::opt_string"
    )]
    pub target_table: Option<String>,
    /// Parameters given inline next to `type` instead of under `params`.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A typed operation plus its planner annotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOperation", into = "RawOperation")]
pub struct PlannedOperation {
    pub op: Operation,
    pub description: Option<String>,
    /// Binding the operation applies to; `None` means the primary table.
    pub target_table: Option<String>,
}

impl PlannedOperation {
    pub fn new(op: Operation) -> Self {
        Self {
            op,
            description: None,
            target_table: None,
        }
    }

    pub fn target(&self) -> &str {
        self.target_table.as_deref().unwrap_or(PRIMARY_BINDING)
    }

    pub fn kind(&self) -> OperationKind {
        self.op.kind()
    }
}

impl TryFrom<RawOperation> for PlannedOperation {
    type Error = PlanError;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        let kind = OperationKind::parse(&raw.kind)
            .ok_or_else(|| PlanError::UnknownKind(raw.kind.clone()))?;
        let invalid = |message: String| PlanError::InvalidParams { kind, message };

        let params = match raw.params {
            None | Some(serde_json::Value::Null) => serde_json::Value::Object(raw.extra),
            Some(serde_json::Value::Object(map)) if map.is_empty() && !raw.extra.is_empty() => {
                serde_json::Value::Object(raw.extra)
            }
            Some(obj @ serde_json::Value::Object(_)) => obj,
            Some(other) => return Err(invalid(format!("params must be an object, got {other}"))),
        };

        let op: Operation = serde_json::from_value(serde_json::json!({
            "type": kind.tag(),
            "params": params,
        }))
        .map_err(|e| invalid(e.to_string()))?;
        op.validate().map_err(invalid)?;

        Ok(Self {
            op,
            description: raw.description.filter(|d| !d.trim().is_empty()),
            target_table: raw.target_table.filter(|t| !t.trim().is_empty()),
        })
    }
}

impl From<PlannedOperation> for RawOperation {
    fn from(p: PlannedOperation) -> Self {
        let params = serde_json::to_value(&p.op)
            .ok()
            .and_then(|mut v| v.get_mut("params").map(serde_json::Value::take));
        RawOperation {
            kind: p.op.kind().tag().to_string(),
            params,
            description: p.description,
            target_table: p.target_table,
            extra: serde_json::Map::new(),
        }
    }
}

/// The planner's plan before parsing and reference resolution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPlan {
    #[serde(default, deserialize_with = "lenient::string")]
    pub summary: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::opt_string"
    )]
    pub estimated_impact: Option<String>,
    #[serde(default)]
    pub operations: Vec<RawOperation>,
}

impl RawPlan {
    /// Parses every operation, reporting the first failure by 1-based position.
    pub fn parse_operations(&self) -> Result<Vec<PlannedOperation>, PlanError> {
        if self.operations.is_empty() {
            return Err(PlanError::Empty);
        }
        self.operations
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, raw)| {
                PlannedOperation::try_from(raw).map_err(|e| PlanError::AtIndex {
                    index: i + 1,
                    source: Box::new(e),
                })
            })
            .collect()
    }
}

/// An executable plan: resolved operations over explicit table bindings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationPlan {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<String>,
    pub operations: Vec<PlannedOperation>,
    #[serde(default)]
    pub bindings: Vec<TableBinding>,
}

impl OperationPlan {
    pub fn binding(&self, id: &str) -> Option<&TableBinding> {
        self.bindings.iter().find(|b| b.id == id)
    }

    pub fn primary(&self) -> Option<&TableBinding> {
        self.binding(PRIMARY_BINDING)
    }

    /// Summary plus numbered step descriptions, for follow-up requests.
    pub fn describe(&self) -> String {
        let mut out = self.summary.clone();
        for (i, op) in self.operations.iter().enumerate() {
            let text = op.description.clone().unwrap_or_else(|| op.kind().label().to_string());
            out.push_str(&format!("\n{}. {}", i + 1, text));
        }
        out
    }

    pub fn to_raw(&self) -> RawPlan {
        RawPlan {
            summary: self.summary.clone(),
            estimated_impact: self.estimated_impact.clone(),
            operations: self.operations.iter().cloned().map(RawOperation::from).collect(),
        }
    }
}
