// Document store: durable diagram rows and their operation log.
//
// Two backends behind one enum: PostgreSQL for deployments and an in-process
// memory store for development and tests. The commit path is the only writer
// of snapshot/version/log rows and is atomic in both backends.

mod memory;
mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use diagram_sync_common::edit::{EditError, TaggedEdit};
use diagram_sync_common::types::{Diagram, LogEntry, Snapshot};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use memory::MemoryDocumentStore;

/// Maximum diagram name length.
pub const MAX_NAME_CHARS: usize = 120;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("diagram not found")]
    NotFound,

    #[error("diagram name already exists")]
    NameConflict,

    #[error(transparent)]
    Rejected(#[from] EditError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result of an atomic compare-and-increment commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Applied { version: i64, updated_at: DateTime<Utc> },
    Conflict { current_version: i64, snapshot: Snapshot },
}

#[derive(Clone)]
pub enum DocumentStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryDocumentStore>>),
}

impl DocumentStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryDocumentStore::default())))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Diagram>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::get(pool, id).await,
            Self::Memory(store) => Ok(store.read().await.get(id)),
        }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Diagram>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::find_by_name(pool, name).await,
            Self::Memory(store) => Ok(store.read().await.find_by_name(name)),
        }
    }

    /// Return the diagram called `name`, creating an empty one at version 0
    /// if none exists. Safe against concurrent creators of the same name.
    pub async fn get_or_create_by_name(&self, name: &str) -> Result<Diagram, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::get_or_create_by_name(pool, name).await,
            Self::Memory(store) => Ok(store.write().await.get_or_create_by_name(name)),
        }
    }

    pub async fn create(&self, name: &str) -> Result<Diagram, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::create(pool, name).await,
            Self::Memory(store) => store.write().await.create(name),
        }
    }

    /// All diagrams, most recently modified first.
    pub async fn list(&self) -> Result<Vec<Diagram>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::list(pool).await,
            Self::Memory(store) => Ok(store.read().await.list()),
        }
    }

    pub async fn rename(&self, id: Uuid, name: &str) -> Result<Diagram, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::rename(pool, id, name).await,
            Self::Memory(store) => store.write().await.rename(id, name),
        }
    }

    /// Delete a diagram and, with it, its operation log.
    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => postgres::delete(pool, id).await,
            Self::Memory(store) => store.write().await.delete(id),
        }
    }

    /// Apply `edit` if the stored version still equals `expected_version`.
    ///
    /// On success the new snapshot, `version + 1` and a log entry with
    /// `seq = version + 1` are persisted together. On conflict nothing is
    /// written. An edit the engine rejects writes nothing either.
    pub async fn commit_edit(
        &self,
        id: Uuid,
        expected_version: i64,
        edit: &TaggedEdit,
        actor: Option<Uuid>,
    ) -> Result<CommitOutcome, StoreError> {
        match self {
            Self::Postgres(pool) => {
                postgres::commit_edit(pool, id, expected_version, edit, actor).await
            }
            Self::Memory(store) => {
                store.write().await.commit_edit(id, expected_version, edit, actor)
            }
        }
    }

    /// Log entries with `seq > after_seq`, ascending, at most `limit`.
    pub async fn list_ops(
        &self,
        id: Uuid,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        match self {
            Self::Postgres(pool) => postgres::list_ops(pool, id, after_seq, limit).await,
            Self::Memory(store) => store.read().await.list_ops(id, after_seq, limit),
        }
    }
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(format!("name must be at most {MAX_NAME_CHARS} characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagram_sync_common::edit::Edit;
    use serde_json::json;

    fn node_add(id: &str) -> TaggedEdit {
        TaggedEdit::parse(json!({ "type": "node.add", "id": id, "data": { "name": id } }))
            .expect("node.add should parse")
    }

    #[tokio::test]
    async fn get_or_create_by_name_is_idempotent() {
        let store = DocumentStore::memory();

        let first = store.get_or_create_by_name("board").await.expect("create should succeed");
        let second = store.get_or_create_by_name("board").await.expect("lookup should succeed");

        assert_eq!(first.id, second.id);
        assert_eq!(first.version, 0);
        assert!(first.snapshot.is_empty());
        assert_eq!(store.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn commit_increments_version_and_appends_log() {
        let store = DocumentStore::memory();
        let diagram = store.create("board").await.expect("create should succeed");
        let actor = Uuid::new_v4();

        for (expected, id) in ["n1", "n2", "n3"].iter().enumerate() {
            let outcome = store
                .commit_edit(diagram.id, expected as i64, &node_add(id), Some(actor))
                .await
                .expect("commit should succeed");
            assert!(matches!(outcome, CommitOutcome::Applied { version, .. } if version == expected as i64 + 1));
        }

        let stored = store.get(diagram.id).await.expect("get").expect("diagram exists");
        let log = store.list_ops(diagram.id, 0, 100).await.expect("list ops");

        assert_eq!(stored.version, 3);
        assert_eq!(stored.snapshot.nodes.len(), 3);
        assert_eq!(log.iter().map(|entry| entry.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(log.last().map(|entry| entry.seq), Some(stored.version));
        assert!(log.iter().all(|entry| entry.user_id == Some(actor)));
        assert_eq!(log[0].op_type, "node.add");
        assert_eq!(log[0].payload["id"], "n1");
    }

    #[tokio::test]
    async fn stale_commit_reports_conflict_without_writing() {
        let store = DocumentStore::memory();
        let diagram = store.create("board").await.expect("create should succeed");
        store.commit_edit(diagram.id, 0, &node_add("n1"), None).await.expect("first commit");

        let outcome = store
            .commit_edit(diagram.id, 0, &node_add("n2"), None)
            .await
            .expect("stale commit should not error");

        match outcome {
            CommitOutcome::Conflict { current_version, snapshot } => {
                assert_eq!(current_version, 1);
                assert!(snapshot.nodes.contains_key("n1"));
                assert!(!snapshot.nodes.contains_key("n2"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.list_ops(diagram.id, 0, 100).await.expect("list ops").len(), 1);
    }

    #[tokio::test]
    async fn rejected_edit_leaves_version_unchanged() {
        let store = DocumentStore::memory();
        let diagram = store.create("board").await.expect("create should succeed");
        let edit = TaggedEdit::parse(json!({
            "type": "relationship.add",
            "id": "r1",
            "data": { "targetId": "b", "type": "association" }
        }))
        .expect("relationship.add should parse");

        let error = store
            .commit_edit(diagram.id, 0, &edit, None)
            .await
            .expect_err("missing sourceId should be rejected");

        assert!(matches!(error, StoreError::Rejected(EditError::MissingField { field: "sourceId", .. })));
        let stored = store.get(diagram.id).await.expect("get").expect("diagram exists");
        assert_eq!(stored.version, 0);
        assert!(store.list_ops(diagram.id, 0, 100).await.expect("list ops").is_empty());
    }

    #[tokio::test]
    async fn repeated_remove_still_consumes_versions() {
        let store = DocumentStore::memory();
        let diagram = store.create("board").await.expect("create should succeed");
        let remove = TaggedEdit::from_edit(Edit::NodeRemove { id: "n1".into() }).expect("remove");

        store.commit_edit(diagram.id, 0, &node_add("n1"), None).await.expect("add");
        store.commit_edit(diagram.id, 1, &remove, None).await.expect("first remove");
        store.commit_edit(diagram.id, 2, &remove, None).await.expect("second remove");

        let stored = store.get(diagram.id).await.expect("get").expect("diagram exists");
        assert_eq!(stored.version, 3);
        assert!(stored.snapshot.nodes.is_empty());
        assert_eq!(store.list_ops(diagram.id, 1, 100).await.expect("list ops").len(), 2);
    }

    #[tokio::test]
    async fn directory_operations() {
        let store = DocumentStore::memory();
        let a = store.create("alpha").await.expect("create alpha");
        let b = store.create("beta").await.expect("create beta");

        assert!(matches!(store.create("alpha").await, Err(StoreError::NameConflict)));
        assert!(matches!(store.rename(b.id, "alpha").await, Err(StoreError::NameConflict)));

        let renamed = store.rename(a.id, "gamma").await.expect("rename");
        assert_eq!(renamed.name, "gamma");
        assert!(store.find_by_name("alpha").await.expect("find").is_none());

        // Most recently modified first.
        let names: Vec<_> = store.list().await.expect("list").into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["gamma", "beta"]);

        store.commit_edit(b.id, 0, &node_add("n1"), None).await.expect("commit");
        store.delete(b.id).await.expect("delete");
        assert!(store.get(b.id).await.expect("get").is_none());
        assert!(matches!(store.list_ops(b.id, 0, 10).await, Err(StoreError::NotFound)));
        assert!(matches!(store.delete(b.id).await, Err(StoreError::NotFound)));
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("board").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_CHARS + 1)).is_err());
    }
}
