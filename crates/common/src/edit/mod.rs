// Edit model: the closed set of changes a client or the agent may submit.

mod apply;

pub use apply::apply;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::Attributes;

// ── Kinds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditKind {
    NodeAdd,
    NodeUpdate,
    NodeRemove,
    LinkAdd,
    LinkRemove,
    RelationshipAdd,
    RelationshipRemove,
}

impl EditKind {
    pub const ALL: [EditKind; 7] = [
        Self::NodeAdd,
        Self::NodeUpdate,
        Self::NodeRemove,
        Self::LinkAdd,
        Self::LinkRemove,
        Self::RelationshipAdd,
        Self::RelationshipRemove,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NodeAdd => "node.add",
            Self::NodeUpdate => "node.update",
            Self::NodeRemove => "node.remove",
            Self::LinkAdd => "link.add",
            Self::LinkRemove => "link.remove",
            Self::RelationshipAdd => "relationship.add",
            Self::RelationshipRemove => "relationship.remove",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Edits ────────────────────────────────────────────────────────────

/// A single described change to a diagram snapshot.
///
/// Wire shape: `{"type": "node.add", "id": "n1", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Edit {
    #[serde(rename = "node.add")]
    NodeAdd {
        id: String,
        #[serde(default)]
        data: Attributes,
    },
    #[serde(rename = "node.update")]
    NodeUpdate {
        id: String,
        #[serde(default)]
        patch: Attributes,
    },
    #[serde(rename = "node.remove")]
    NodeRemove { id: String },
    #[serde(rename = "link.add")]
    LinkAdd {
        id: String,
        #[serde(default)]
        data: Attributes,
    },
    #[serde(rename = "link.remove")]
    LinkRemove { id: String },
    #[serde(rename = "relationship.add")]
    RelationshipAdd {
        id: String,
        #[serde(default)]
        data: Attributes,
    },
    #[serde(rename = "relationship.remove")]
    RelationshipRemove { id: String },
}

impl Edit {
    pub fn kind(&self) -> EditKind {
        match self {
            Self::NodeAdd { .. } => EditKind::NodeAdd,
            Self::NodeUpdate { .. } => EditKind::NodeUpdate,
            Self::NodeRemove { .. } => EditKind::NodeRemove,
            Self::LinkAdd { .. } => EditKind::LinkAdd,
            Self::LinkRemove { .. } => EditKind::LinkRemove,
            Self::RelationshipAdd { .. } => EditKind::RelationshipAdd,
            Self::RelationshipRemove { .. } => EditKind::RelationshipRemove,
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            Self::NodeAdd { id, .. }
            | Self::NodeUpdate { id, .. }
            | Self::NodeRemove { id }
            | Self::LinkAdd { id, .. }
            | Self::LinkRemove { id }
            | Self::RelationshipAdd { id, .. }
            | Self::RelationshipRemove { id } => id,
        }
    }
}

/// A parsed edit together with the exact JSON the submitter sent.
///
/// The log and the `op` broadcast carry `payload` verbatim, so fields the
/// relay does not interpret (e.g. a client correlation id) survive.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEdit {
    pub edit: Edit,
    pub payload: Value,
}

impl TaggedEdit {
    pub fn parse(payload: Value) -> Result<Self, EditError> {
        let kind_name = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EditError::MissingKind)?;
        let kind = EditKind::parse(kind_name)
            .ok_or_else(|| EditError::UnknownKind(kind_name.to_string()))?;

        let edit = serde_json::from_value::<Edit>(payload.clone()).map_err(|error| {
            EditError::Malformed { kind: kind.as_str(), message: error.to_string() }
        })?;

        Ok(Self { edit, payload })
    }

    pub fn from_edit(edit: Edit) -> Result<Self, EditError> {
        let kind = edit.kind();
        let payload = serde_json::to_value(&edit)
            .map_err(|error| EditError::Malformed { kind: kind.as_str(), message: error.to_string() })?;
        Ok(Self { edit, payload })
    }

    pub fn kind(&self) -> EditKind {
        self.edit.kind()
    }
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("edit is missing a string `type` field")]
    MissingKind,

    #[error("unknown edit kind: {0}")]
    UnknownKind(String),

    #[error("malformed {kind} edit: {message}")]
    Malformed { kind: &'static str, message: String },

    #[error("{kind} edit requires a string `{field}`")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("{kind} edit has an invalid `{field}`: {message}")]
    InvalidField { kind: &'static str, field: &'static str, message: String },
}

impl EditError {
    /// Error code sent to the client in the `error` event.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownKind(_) => "UNKNOWN_EDIT",
            _ => "VALIDATION_FAILED",
        }
    }
}
