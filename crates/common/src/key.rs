// Document keys from the connection route and broadcast group naming.
//
// A key only selects a diagram; the group is named after the diagram it
// resolves to, so every session on one diagram shares one group however it
// connected.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Maximum key length; matches the maximum diagram name length.
pub const MAX_KEY_CHARS: usize = 120;

const GROUP_PREFIX: &str = "diagram.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("document key is empty")]
    Empty,

    #[error("document key exceeds maximum length of {MAX_KEY_CHARS} characters")]
    TooLong,

    #[error("document key contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A validated document key: either a diagram UUID or a diagram name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    raw: String,
}

impl DocumentKey {
    /// Validate a key taken from the connection route (`[A-Za-z0-9_-]+`).
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        if raw.is_empty() {
            return Err(KeyError::Empty);
        }
        if raw.chars().count() > MAX_KEY_CHARS {
            return Err(KeyError::TooLong);
        }
        if let Some(invalid) =
            raw.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(KeyError::InvalidChar(invalid));
        }

        Ok(Self { raw: raw.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The key interpreted as a diagram identity, if it is a UUID.
    pub fn as_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.raw).ok()
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Broadcast group of a diagram: `diagram.<uuid>`.
pub fn group_name(diagram_id: Uuid) -> String {
    format!("{GROUP_PREFIX}{diagram_id}")
}
