pub mod batch;
pub mod controller;

use diagram_sync_common::edit::{EditError, TaggedEdit};
use diagram_sync_common::types::Snapshot;
use thiserror::Error;

use crate::error::ErrorCode;

pub use batch::{apply_batch, BatchReport, BatchStop, EditSink};
pub use controller::{BoundController, DiagramHandle, SyncController};

/// How a document key from the connection route is turned into a diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// A key that is the UUID of an existing diagram selects it; any other
    /// key is treated as a name and the diagram is created on first use.
    Lazy,
    /// The key must be the UUID of an existing diagram.
    Strict,
}

impl KeyPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lazy" => Some(Self::Lazy),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Result of a version-gated edit.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { version: i64, edit: TaggedEdit },
    Conflict { current_version: i64, snapshot: Snapshot },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document key `{key}` does not resolve to a diagram")]
    Resolution { key: String },

    #[error(transparent)]
    Rejected(#[from] EditError),

    #[error("diagram storage failed: {0:#}")]
    Storage(anyhow::Error),
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Resolution { .. } => ErrorCode::ResolutionFailed,
            Self::Rejected(EditError::UnknownKind(_)) => ErrorCode::UnknownEdit,
            Self::Rejected(_) => ErrorCode::ValidationFailed,
            Self::Storage(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to send to a client; storage details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Storage(_) => ErrorCode::InternalError.default_message().to_string(),
            other => other.to_string(),
        }
    }
}
