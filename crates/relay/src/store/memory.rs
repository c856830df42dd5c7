// In-process document store for development runs and tests.
//
// Callers hold the surrounding `RwLock` for the duration of each method, so a
// commit observes and writes the version under a single write guard.

use std::collections::HashMap;

use chrono::Utc;
use diagram_sync_common::edit::{self, TaggedEdit};
use diagram_sync_common::types::{Diagram, LogEntry, Snapshot};
use uuid::Uuid;

use super::{CommitOutcome, StoreError};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    diagrams: HashMap<Uuid, StoredDiagram>,
    ops: HashMap<Uuid, Vec<LogEntry>>,
    touch_counter: u64,
}

#[derive(Debug, Clone)]
struct StoredDiagram {
    diagram: Diagram,
    // Tie-breaker for `list` ordering when timestamps collide.
    touched: u64,
}

impl MemoryDocumentStore {
    pub(super) fn get(&self, id: Uuid) -> Option<Diagram> {
        self.diagrams.get(&id).map(|stored| stored.diagram.clone())
    }

    pub(super) fn find_by_name(&self, name: &str) -> Option<Diagram> {
        self.diagrams
            .values()
            .find(|stored| stored.diagram.name == name)
            .map(|stored| stored.diagram.clone())
    }

    pub(super) fn get_or_create_by_name(&mut self, name: &str) -> Diagram {
        if let Some(existing) = self.find_by_name(name) {
            return existing;
        }
        self.insert_new(name)
    }

    pub(super) fn create(&mut self, name: &str) -> Result<Diagram, StoreError> {
        if self.find_by_name(name).is_some() {
            return Err(StoreError::NameConflict);
        }
        Ok(self.insert_new(name))
    }

    pub(super) fn list(&self) -> Vec<Diagram> {
        let mut stored = self.diagrams.values().collect::<Vec<_>>();
        stored.sort_by(|a, b| {
            b.diagram
                .updated_at
                .cmp(&a.diagram.updated_at)
                .then_with(|| b.touched.cmp(&a.touched))
        });
        stored.into_iter().map(|stored| stored.diagram.clone()).collect()
    }

    pub(super) fn rename(&mut self, id: Uuid, name: &str) -> Result<Diagram, StoreError> {
        if self.diagrams.values().any(|stored| stored.diagram.name == name && stored.diagram.id != id)
        {
            return Err(StoreError::NameConflict);
        }

        let touched = self.next_touch();
        let stored = self.diagrams.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.diagram.name = name.to_string();
        stored.diagram.updated_at = Utc::now();
        stored.touched = touched;
        Ok(stored.diagram.clone())
    }

    pub(super) fn delete(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.diagrams.remove(&id).ok_or(StoreError::NotFound)?;
        self.ops.remove(&id);
        Ok(())
    }

    pub(super) fn commit_edit(
        &mut self,
        id: Uuid,
        expected_version: i64,
        edit: &TaggedEdit,
        actor: Option<Uuid>,
    ) -> Result<CommitOutcome, StoreError> {
        let touched = self.next_touch();
        let stored = self.diagrams.get_mut(&id).ok_or(StoreError::NotFound)?;

        if stored.diagram.version != expected_version {
            return Ok(CommitOutcome::Conflict {
                current_version: stored.diagram.version,
                snapshot: stored.diagram.snapshot.clone(),
            });
        }

        let next = edit::apply(&stored.diagram.snapshot, &edit.edit)?;
        let version = stored.diagram.version + 1;
        let now = Utc::now();

        stored.diagram.snapshot = next;
        stored.diagram.version = version;
        stored.diagram.updated_at = now;
        stored.touched = touched;

        self.ops.entry(id).or_default().push(LogEntry {
            diagram_id: id,
            seq: version,
            user_id: actor,
            op_type: edit.kind().as_str().to_string(),
            payload: edit.payload.clone(),
            created_at: now,
        });

        Ok(CommitOutcome::Applied { version, updated_at: now })
    }

    pub(super) fn list_ops(
        &self,
        id: Uuid,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StoreError> {
        if !self.diagrams.contains_key(&id) {
            return Err(StoreError::NotFound);
        }

        Ok(self
            .ops
            .get(&id)
            .map(|entries| {
                entries.iter().filter(|entry| entry.seq > after_seq).take(limit).cloned().collect()
            })
            .unwrap_or_default())
    }

    fn insert_new(&mut self, name: &str) -> Diagram {
        let diagram = Diagram {
            id: Uuid::new_v4(),
            name: name.to_string(),
            snapshot: Snapshot::default(),
            version: 0,
            updated_at: Utc::now(),
        };
        let touched = self.next_touch();
        self.diagrams.insert(diagram.id, StoredDiagram { diagram: diagram.clone(), touched });
        diagram
    }

    fn next_touch(&mut self) -> u64 {
        self.touch_counter += 1;
        self.touch_counter
    }
}
