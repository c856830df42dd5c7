// Operation engine: (snapshot, edit) -> snapshot. Pure, no I/O.

use serde_json::{Map, Value};

use super::{Edit, EditError, EditKind};
use crate::types::{Attributes, Snapshot};

const RELATIONSHIP_REQUIRED_FIELDS: [&str; 3] = ["sourceId", "targetId", "type"];

/// Apply one edit to a snapshot, returning the new snapshot.
///
/// Removes and updates of absent ids are no-ops; adds overwrite silently.
/// On error the input snapshot is untouched and nothing should be persisted.
pub fn apply(snapshot: &Snapshot, edit: &Edit) -> Result<Snapshot, EditError> {
    let mut next = snapshot.clone();

    match edit {
        Edit::NodeAdd { id, data } => {
            next.nodes.insert(id.clone(), with_id(id, data));
        }
        Edit::NodeUpdate { id, patch } => {
            if let Some(node) = next.nodes.get_mut(id) {
                for (key, value) in patch {
                    if key != "id" {
                        node.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Edit::NodeRemove { id } => {
            next.nodes.remove(id);
        }
        Edit::LinkAdd { id, data } => {
            next.links.insert(id.clone(), with_id(id, data));
        }
        Edit::LinkRemove { id } | Edit::RelationshipRemove { id } => {
            next.links.remove(id);
        }
        Edit::RelationshipAdd { id, data } => {
            let link = relationship_link(id, data)?;
            next.links.insert(id.clone(), link);
        }
    }

    Ok(next)
}

fn with_id(id: &str, data: &Attributes) -> Attributes {
    let mut entry = Map::with_capacity(data.len() + 1);
    entry.insert("id".to_string(), Value::String(id.to_string()));
    for (key, value) in data {
        if key != "id" {
            entry.insert(key.clone(), value.clone());
        }
    }
    entry
}

fn relationship_link(id: &str, data: &Attributes) -> Result<Attributes, EditError> {
    let kind = EditKind::RelationshipAdd.as_str();

    for field in RELATIONSHIP_REQUIRED_FIELDS {
        match data.get(field) {
            Some(Value::String(value)) if !value.is_empty() => {}
            _ => return Err(EditError::MissingField { kind, field }),
        }
    }

    let cardinality = match data.get("cardinality") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(other) => {
            return Err(EditError::InvalidField {
                kind,
                field: "cardinality",
                message: format!("expected an object, got {other}"),
            })
        }
    };

    let mut link = with_id(id, data);
    link.insert("cardinality".to_string(), cardinality);
    Ok(link)
}
