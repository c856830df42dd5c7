// WebSocket frames exchanged between diagram clients and the relay.
//
// Inbound frames are tagged by `cmd`, outbound frames by `evt`. Field names
// are camelCase on the wire.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::Snapshot;

/// Client -> Server commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Request the current snapshot (private reply).
    Init,

    /// Ephemeral position while dragging; broadcast, never persisted.
    Drag { id: String, pos: Position },

    /// Final position of a drag; broadcast, never persisted.
    DragEnd { id: String, pos: Position },

    /// Version-gated edit. `op` is parsed into an edit by the relay so that
    /// malformed edits can be answered with a precise error.
    Op { base_version: i64, op: Value },

    /// Ask the automated agent for a batch of edits.
    AiUpdate { prompt: String },
}

/// Server -> Client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "evt", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Snapshot { diagram_id: Uuid, version: i64, snapshot: Snapshot },

    Drag { user_id: Option<Uuid>, id: String, pos: Position },

    DragEnd { user_id: Option<Uuid>, id: String, pos: Position },

    /// A committed edit, broadcast to the whole group in commit order.
    Op { version: i64, op: Value, user_id: Option<Uuid> },

    /// Private reply to a stale `op`: the authoritative state.
    Conflict { current_version: i64, snapshot: Snapshot },

    Presence { user_id: Option<Uuid>, state: PresenceState },

    /// Private summary after an `ai_update` batch.
    AiApplied { applied: usize, version: i64 },

    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error { code: code.into(), message: message.into() }
    }

    /// The `evt` tag this event serializes with.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Snapshot { .. } => "snapshot",
            Self::Drag { .. } => "drag",
            Self::DragEnd { .. } => "drag_end",
            Self::Op { .. } => "op",
            Self::Conflict { .. } => "conflict",
            Self::Presence { .. } => "presence",
            Self::AiApplied { .. } => "ai_applied",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Join,
    Leave,
}

/// Canvas position. Clients may send fractional coordinates; they are
/// truncated to integers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    #[serde(deserialize_with = "truncate_coordinate")]
    pub x: i64,
    #[serde(deserialize_with = "truncate_coordinate")]
    pub y: i64,
}

fn truncate_coordinate<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(value) = number.as_i64() {
        return Ok(value);
    }
    number
        .as_f64()
        .filter(|value| value.is_finite())
        .map(|value| value.trunc() as i64)
        .ok_or_else(|| serde::de::Error::custom("coordinate must be a finite number"))
}

pub fn decode_command(raw: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str::<ClientCommand>(raw)
}

pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_every_command() {
        assert_eq!(decode_command(r#"{"cmd":"init"}"#).expect("init"), ClientCommand::Init);

        assert_eq!(
            decode_command(r#"{"cmd":"drag","id":"n1","pos":{"x":10.7,"y":-3.2}}"#).expect("drag"),
            ClientCommand::Drag { id: "n1".into(), pos: Position { x: 10, y: -3 } }
        );

        assert_eq!(
            decode_command(r#"{"cmd":"drag_end","id":"n1","pos":{"x":4,"y":5}}"#)
                .expect("drag_end"),
            ClientCommand::DragEnd { id: "n1".into(), pos: Position { x: 4, y: 5 } }
        );

        assert_eq!(
            decode_command(r#"{"cmd":"op","baseVersion":5,"op":{"type":"node.remove","id":"n1"}}"#)
                .expect("op"),
            ClientCommand::Op {
                base_version: 5,
                op: json!({ "type": "node.remove", "id": "n1" })
            }
        );

        assert_eq!(
            decode_command(r#"{"cmd":"ai_update","prompt":"add a Dog class"}"#).expect("ai_update"),
            ClientCommand::AiUpdate { prompt: "add a Dog class".into() }
        );
    }

    #[test]
    fn rejects_unknown_commands_and_missing_fields() {
        assert!(decode_command(r#"{"cmd":"join"}"#).is_err());
        assert!(decode_command(r#"{"cmd":"op","op":{}}"#).is_err());
        assert!(decode_command(r#"{"cmd":"drag","id":"n1","pos":{"x":"1","y":2}}"#).is_err());
        assert!(decode_command("not json").is_err());
    }

    #[test]
    fn encodes_events_with_camel_case_fields() {
        let op = ServerEvent::Op { version: 6, op: json!({ "type": "node.add" }), user_id: None };
        let value = serde_json::to_value(&op).expect("op should serialize");
        assert_eq!(value, json!({ "evt": "op", "version": 6, "op": { "type": "node.add" }, "userId": null }));

        let conflict = ServerEvent::Conflict { current_version: 6, snapshot: Snapshot::default() };
        let value = serde_json::to_value(&conflict).expect("conflict should serialize");
        assert_eq!(value["evt"], "conflict");
        assert_eq!(value["currentVersion"], 6);
        assert_eq!(value["snapshot"], json!({ "nodes": {}, "links": {} }));
    }

    #[test]
    fn event_name_matches_serialized_tag() {
        let events = [
            ServerEvent::Snapshot {
                diagram_id: Uuid::new_v4(),
                version: 0,
                snapshot: Snapshot::default(),
            },
            ServerEvent::Drag { user_id: None, id: "n1".into(), pos: Position { x: 0, y: 0 } },
            ServerEvent::DragEnd { user_id: None, id: "n1".into(), pos: Position { x: 0, y: 0 } },
            ServerEvent::Presence { user_id: Some(Uuid::new_v4()), state: PresenceState::Join },
            ServerEvent::AiApplied { applied: 2, version: 9 },
            ServerEvent::error("VALIDATION_FAILED", "bad edit"),
        ];

        for event in events {
            let value = serde_json::to_value(&event).expect("event should serialize");
            assert_eq!(value["evt"], event.name());
        }
    }
}
