//! Change records emitted after a successful commit.
//!
//! One record per applied operation, in the order the engine applied them.
//! Watch subscribers receive these; the committing caller gets the same list
//! back in its commit report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Element, ElementId, ElementKind, Operation, OperationKind};

/// Unique identifier for a commit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CommitId(pub Uuid);

impl CommitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single committed change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub commit_id: CommitId,
    /// Position within the commit, starting at 0.
    pub sequence: u32,
    pub committed_at: DateTime<Utc>,
    pub operation: OperationKind,
    pub snapshot: Element,
}

impl ChangeRecord {
    pub fn element_id(&self) -> ElementId {
        self.snapshot.id()
    }

    pub fn element_kind(&self) -> ElementKind {
        self.snapshot.kind()
    }

    pub fn type_tag(&self) -> &str {
        self.snapshot.type_tag()
    }
}

/// Turn an applied operation list into change records.
pub fn change_records(
    commit_id: CommitId,
    committed_at: DateTime<Utc>,
    operations: &[Operation],
) -> Vec<ChangeRecord> {
    operations
        .iter()
        .enumerate()
        .map(|(i, op)| ChangeRecord {
            commit_id,
            sequence: i as u32,
            committed_at,
            operation: op.kind,
            snapshot: op.element.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Entity;

    #[test]
    fn records_follow_operation_order() {
        let a: Element = Entity::new("A").unwrap().into();
        let b: Element = Entity::new("B").unwrap().into();
        let ops = vec![Operation::delete(a.clone()), Operation::insert(b.clone())];

        let records = change_records(CommitId::new(), Utc::now(), &ops);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[0].operation, OperationKind::Delete);
        assert_eq!(records[0].element_id(), a.id());
        assert_eq!(records[1].type_tag(), "B");
        assert_eq!(records[1].commit_id, records[0].commit_id);
    }

    #[test]
    fn change_record_serializes() {
        let record = ChangeRecord {
            commit_id: CommitId::new(),
            sequence: 0,
            committed_at: Utc::now(),
            operation: OperationKind::Insert,
            snapshot: Entity::new("Person").unwrap().into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"operation\":\"insert\""));
    }
}
