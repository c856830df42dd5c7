// Concurrency controller: the version gate in front of the document store.
//
// Edits to one diagram are serialized by a per-diagram async mutex; the store
// additionally re-checks the version under a row lock. The `op` broadcast is
// sent while the mutex is still held, so group members observe edits in
// commit order.

use std::collections::HashMap;
use std::sync::Arc;

use diagram_sync_common::edit::TaggedEdit;
use diagram_sync_common::key::{group_name, DocumentKey};
use diagram_sync_common::protocol::ws::ServerEvent;
use diagram_sync_common::types::Diagram;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::{ApplyOutcome, EditSink, KeyPolicy, SyncError};
use crate::group::GroupBus;
use crate::store::{CommitOutcome, DocumentStore, StoreError};

/// A document key resolved to a concrete diagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramHandle {
    pub id: Uuid,
    pub key: DocumentKey,
    group: String,
}

impl DiagramHandle {
    /// Broadcast group of the diagram, shared by every key that resolves to it.
    pub fn group(&self) -> &str {
        &self.group
    }
}

pub struct SyncController {
    store: DocumentStore,
    bus: Arc<GroupBus>,
    policy: KeyPolicy,
    // One entry per diagram edited since startup; removed by `forget`.
    locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SyncController {
    pub fn new(store: DocumentStore, bus: Arc<GroupBus>, policy: KeyPolicy) -> Self {
        Self { store, bus, policy, locks: RwLock::new(HashMap::new()) }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn bus(&self) -> &Arc<GroupBus> {
        &self.bus
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Resolve `key` to a diagram according to the configured policy.
    pub async fn resolve(&self, key: &DocumentKey) -> Result<DiagramHandle, SyncError> {
        let diagram = self.resolve_diagram(key).await?;
        Ok(DiagramHandle { id: diagram.id, key: key.clone(), group: group_name(diagram.id) })
    }

    async fn resolve_diagram(&self, key: &DocumentKey) -> Result<Diagram, SyncError> {
        if let Some(id) = key.as_uuid() {
            if let Some(diagram) = self.store.get(id).await.map_err(|e| storage_error(key, e))? {
                return Ok(diagram);
            }
        }

        match self.policy {
            KeyPolicy::Strict => Err(SyncError::Resolution { key: key.as_str().to_string() }),
            KeyPolicy::Lazy => self
                .store
                .get_or_create_by_name(key.as_str())
                .await
                .map_err(|e| storage_error(key, e)),
        }
    }

    /// Current state of the diagram behind `handle`.
    pub async fn snapshot(&self, handle: &DiagramHandle) -> Result<Diagram, SyncError> {
        self.store
            .get(handle.id)
            .await
            .map_err(|e| storage_error(&handle.key, e))?
            .ok_or_else(|| SyncError::Resolution { key: handle.key.as_str().to_string() })
    }

    /// Resolve `key` and apply `edit` if the diagram is still at
    /// `expected_version`.
    pub async fn apply_edit(
        &self,
        key: &DocumentKey,
        expected_version: i64,
        edit: TaggedEdit,
        actor: Option<Uuid>,
    ) -> Result<ApplyOutcome, SyncError> {
        let handle = self.resolve(key).await?;
        self.apply_resolved(&handle, expected_version, edit, actor).await
    }

    /// Version-gated apply for an already resolved diagram.
    ///
    /// On success the committed edit has been broadcast as an `op` event to
    /// the diagram's group before this returns.
    pub async fn apply_resolved(
        &self,
        handle: &DiagramHandle,
        expected_version: i64,
        edit: TaggedEdit,
        actor: Option<Uuid>,
    ) -> Result<ApplyOutcome, SyncError> {
        let span = info_span!(
            "sync.apply_edit",
            diagram_id = %handle.id,
            expected_version,
            op_type = edit.kind().as_str(),
        );

        async move {
            let lock = self.lock_for(handle.id).await;
            let _guard = lock.lock().await;

            let outcome = self
                .store
                .commit_edit(handle.id, expected_version, &edit, actor)
                .await
                .map_err(|e| storage_error(&handle.key, e))?;

            match outcome {
                CommitOutcome::Applied { version, .. } => {
                    let delivered = self
                        .bus
                        .group_send(
                            handle.group(),
                            ServerEvent::Op { version, op: edit.payload.clone(), user_id: actor },
                        )
                        .await;
                    info!(version, delivered, "edit committed");
                    Ok(ApplyOutcome::Applied { version, edit })
                }
                CommitOutcome::Conflict { current_version, snapshot } => {
                    info!(current_version, "edit rejected as stale");
                    Ok(ApplyOutcome::Conflict { current_version, snapshot })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Bind this controller to one diagram and actor for batch application.
    pub fn bind<'a>(&'a self, handle: &'a DiagramHandle, actor: Option<Uuid>) -> BoundController<'a> {
        BoundController { controller: self, handle, actor }
    }

    /// Drop the mutex of a deleted diagram.
    pub async fn forget(&self, diagram_id: Uuid) {
        self.locks.write().await.remove(&diagram_id);
    }

    async fn lock_for(&self, diagram_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.read().await.get(&diagram_id).cloned() {
            return existing;
        }

        let mut locks = self.locks.write().await;
        locks.entry(diagram_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

fn storage_error(key: &DocumentKey, error: StoreError) -> SyncError {
    match error {
        StoreError::NotFound => SyncError::Resolution { key: key.as_str().to_string() },
        StoreError::Rejected(edit_error) => SyncError::Rejected(edit_error),
        StoreError::NameConflict => SyncError::Storage(anyhow::anyhow!(
            "diagram name conflict while resolving `{}`",
            key.as_str()
        )),
        StoreError::Internal(source) => {
            error!(key = key.as_str(), error = %format!("{source:#}"), "diagram storage failed");
            SyncError::Storage(source)
        }
    }
}

/// The controller bound to one diagram and actor.
pub struct BoundController<'a> {
    controller: &'a SyncController,
    handle: &'a DiagramHandle,
    actor: Option<Uuid>,
}

impl EditSink for BoundController<'_> {
    async fn apply(&self, expected_version: i64, edit: TaggedEdit) -> Result<ApplyOutcome, SyncError> {
        self.controller.apply_resolved(self.handle, expected_version, edit, self.actor).await
    }
}
