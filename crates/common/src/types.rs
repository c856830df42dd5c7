// Core domain types shared across the diagram-sync crates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Open attribute map of a node or link. Always carries the entry's own `id`.
pub type Attributes = Map<String, Value>;

/// Full state of a diagram: nodes and links keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: BTreeMap<String, Attributes>,
    #[serde(default)]
    pub links: BTreeMap<String, Attributes>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// A shared diagram as stored by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagram {
    pub id: Uuid,
    pub name: String,
    pub snapshot: Snapshot,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// One immutable entry of a diagram's operation log.
///
/// `seq` equals the diagram version right after the edit was applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub diagram_id: Uuid,
    pub seq: i64,
    /// `None` for anonymous actors.
    pub user_id: Option<Uuid>,
    pub op_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
