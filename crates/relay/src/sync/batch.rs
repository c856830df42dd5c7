// Batch edit coordinator for agent-produced edit lists.
//
// Edits are applied one at a time, each gated on the version returned by the
// previous step. The batch stops at the first conflict or invalid edit; edits
// committed before that point stay committed.

use std::future::Future;

use diagram_sync_common::edit::{EditError, TaggedEdit};
use diagram_sync_common::types::Snapshot;
use serde_json::Value;
use tracing::{info, warn};

use super::{ApplyOutcome, SyncError};

/// Destination of a batch: something that applies one version-gated edit.
pub trait EditSink {
    fn apply(
        &self,
        expected_version: i64,
        edit: TaggedEdit,
    ) -> impl Future<Output = Result<ApplyOutcome, SyncError>> + Send;
}

#[derive(Debug)]
pub struct BatchReport {
    /// Number of edits committed.
    pub applied: usize,
    /// Version after the last committed edit (the base version if none).
    pub version: i64,
    pub stop: Option<BatchStop>,
}

/// Why a batch ended before its last edit. `index` is the position of the
/// edit that was not applied.
#[derive(Debug)]
pub enum BatchStop {
    Conflict { index: usize, current_version: i64, snapshot: Snapshot },
    Rejected { index: usize, error: EditError },
    Failed { index: usize, error: SyncError },
}

pub async fn apply_batch<S>(sink: &S, base_version: i64, edits: Vec<Value>) -> BatchReport
where
    S: EditSink,
{
    let total = edits.len();
    let mut report = BatchReport { applied: 0, version: base_version, stop: None };

    for (index, raw) in edits.into_iter().enumerate() {
        let edit = match TaggedEdit::parse(raw) {
            Ok(edit) => edit,
            Err(error) => {
                warn!(index, error = %error, "batch stopped at invalid edit");
                report.stop = Some(BatchStop::Rejected { index, error });
                break;
            }
        };

        match sink.apply(report.version, edit).await {
            Ok(ApplyOutcome::Applied { version, .. }) => {
                report.version = version;
                report.applied += 1;
            }
            Ok(ApplyOutcome::Conflict { current_version, snapshot }) => {
                info!(index, current_version, "batch stopped at conflict");
                report.stop = Some(BatchStop::Conflict { index, current_version, snapshot });
                break;
            }
            Err(SyncError::Rejected(error)) => {
                warn!(index, error = %error, "batch stopped at rejected edit");
                report.stop = Some(BatchStop::Rejected { index, error });
                break;
            }
            Err(error) => {
                report.stop = Some(BatchStop::Failed { index, error });
                break;
            }
        }
    }

    info!(total, applied = report.applied, version = report.version, "batch finished");
    report
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use serde_json::json;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::group::GroupBus;
    use crate::store::DocumentStore;
    use crate::sync::{KeyPolicy, SyncController};
    use diagram_sync_common::key::DocumentKey;

    /// Records calls and answers with queued outcomes; unscripted calls apply.
    #[derive(Default)]
    struct ScriptedSink {
        calls: Mutex<Vec<(i64, TaggedEdit)>>,
        conflicts: Mutex<VecDeque<Option<i64>>>,
    }

    impl EditSink for ScriptedSink {
        async fn apply(
            &self,
            expected_version: i64,
            edit: TaggedEdit,
        ) -> Result<ApplyOutcome, SyncError> {
            self.calls.lock().await.push((expected_version, edit.clone()));
            match self.conflicts.lock().await.pop_front().flatten() {
                Some(current_version) => {
                    Ok(ApplyOutcome::Conflict { current_version, snapshot: Snapshot::default() })
                }
                None => Ok(ApplyOutcome::Applied { version: expected_version + 1, edit }),
            }
        }
    }

    fn add(id: &str) -> Value {
        json!({ "type": "node.add", "id": id, "data": { "name": id } })
    }

    #[tokio::test]
    async fn second_edit_conflict_stops_the_batch() {
        let sink = ScriptedSink::default();
        sink.conflicts.lock().await.extend([None, Some(9), None]);

        let report = apply_batch(&sink, 7, vec![add("a"), add("b"), add("c")]).await;

        assert_eq!(report.applied, 1);
        assert_eq!(report.version, 8);
        assert!(matches!(
            report.stop,
            Some(BatchStop::Conflict { index: 1, current_version: 9, .. })
        ));

        let calls = sink.calls.lock().await;
        assert_eq!(calls.len(), 2, "the third edit must never be attempted");
        assert_eq!(calls[0].0, 7);
        assert_eq!(calls[1].0, 8, "the version is threaded forward");
    }

    #[tokio::test]
    async fn invalid_edit_stops_before_reaching_the_sink() {
        let sink = ScriptedSink::default();

        let report = apply_batch(
            &sink,
            0,
            vec![add("a"), json!({ "type": "node.rename", "id": "a" }), add("c")],
        )
        .await;

        assert_eq!(report.applied, 1);
        assert_eq!(report.version, 1);
        assert!(matches!(
            report.stop,
            Some(BatchStop::Rejected { index: 1, error: EditError::UnknownKind(_) })
        ));
        assert_eq!(sink.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_reports_base_version() {
        let sink = ScriptedSink::default();
        let report = apply_batch(&sink, 4, Vec::new()).await;

        assert_eq!(report.applied, 0);
        assert_eq!(report.version, 4);
        assert!(report.stop.is_none());
    }

    #[tokio::test]
    async fn batch_through_controller_commits_and_broadcasts_each_step() {
        let bus = Arc::new(GroupBus::new());
        let controller = SyncController::new(DocumentStore::memory(), Arc::clone(&bus), KeyPolicy::Lazy);
        let key = DocumentKey::parse("board").expect("key");
        let handle = controller.resolve(&key).await.expect("resolve");
        let actor = Some(Uuid::new_v4());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bus.group_add(handle.group(), Uuid::new_v4(), tx).await;

        let edits = vec![
            add("Cat"),
            add("Dog"),
            json!({
                "type": "relationship.add",
                "id": "r1",
                "data": { "sourceId": "Cat", "targetId": "Dog", "type": "association" }
            }),
        ];
        let report = apply_batch(&controller.bind(&handle, actor), 0, edits).await;

        assert_eq!(report.applied, 3);
        assert_eq!(report.version, 3);
        assert!(report.stop.is_none());

        let mut versions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let diagram_sync_common::protocol::ws::ServerEvent::Op { version, user_id, .. } = event {
                assert_eq!(user_id, actor);
                versions.push(version);
            }
        }
        assert_eq!(versions, vec![1, 2, 3]);

        let diagram = controller.snapshot(&handle).await.expect("snapshot");
        assert_eq!(diagram.snapshot.links["r1"]["cardinality"], json!({}));
    }

    #[tokio::test]
    async fn stale_base_version_commits_nothing() {
        let controller =
            SyncController::new(DocumentStore::memory(), Arc::new(GroupBus::new()), KeyPolicy::Lazy);
        let key = DocumentKey::parse("board").expect("key");
        let handle = controller.resolve(&key).await.expect("resolve");
        controller
            .apply_resolved(&handle, 0, TaggedEdit::parse(add("x")).expect("edit"), None)
            .await
            .expect("seed edit");

        let report = apply_batch(&controller.bind(&handle, None), 0, vec![add("a"), add("b")]).await;

        assert_eq!(report.applied, 0);
        assert_eq!(report.version, 0);
        assert!(matches!(report.stop, Some(BatchStop::Conflict { index: 0, current_version: 1, .. })));
        assert_eq!(controller.snapshot(&handle).await.expect("snapshot").version, 1);
    }
}
