//! Graph contexts: the unit-of-work boundary for graph mutations.
//!
//! A context stages creations, updates and deletions, then commits them to
//! the engine as one transaction. Lifecycle:
//!
//! ```text
//! Open ──commit──▶ Committing ──ok──▶ Committed
//!   │                  │
//!   │                  ├─validation error─▶ Open
//!   │                  └─engine failure──▶ RolledBack ──reopen──▶ Open
//!   └──rollback──▶ RolledBack
//! ```
//!
//! The context must be driven from one thread at a time. Overlapping calls
//! are detected where possible and fail with `ConcurrentModification`.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Instant;

use chrono::{DateTime, Utc};

use graph_core::events::change_records;
use graph_core::{
    Action, ChangeRecord, CommitId, Element, ElementId, ElementKind, Entity, GraphError,
    Operation, OperationKind, ReadPredicate, Relationship, Result, Value,
};
use graph_engine::Engine;
use graph_watch::WatchRegistry;

use crate::staging::{Origin, Staging};

const OPEN: u8 = 0;
const COMMITTING: u8 = 1;
const COMMITTED: u8 = 2;
const ROLLED_BACK: u8 = 3;
/// Rolled back by an engine failure; staged state kept for `reopen`.
const FAILED: u8 = 4;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Open,
    Committing,
    Committed,
    RolledBack,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextState::Open => "open",
            ContextState::Committing => "committing",
            ContextState::Committed => "committed",
            ContextState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

fn decode(raw: u8) -> ContextState {
    match raw {
        OPEN => ContextState::Open,
        COMMITTING => ContextState::Committing,
        COMMITTED => ContextState::Committed,
        _ => ContextState::RolledBack,
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub commit_id: CommitId,
    pub committed_at: DateTime<Utc>,
    /// One record per applied operation, in apply order.
    pub changes: Vec<ChangeRecord>,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, operation: OperationKind) -> usize {
        self.changes
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }
}

/// A staging area for one unit of work.
pub struct GraphContext {
    engine: Arc<dyn Engine>,
    watch: Option<Arc<WatchRegistry>>,
    state: AtomicU8,
    staging: Mutex<Staging>,
}

impl GraphContext {
    pub fn new(engine: Arc<dyn Engine>, watch: Option<Arc<WatchRegistry>>) -> Self {
        Self {
            engine,
            watch,
            state: AtomicU8::new(OPEN),
            staging: Mutex::new(Staging::default()),
        }
    }

    pub fn state(&self) -> ContextState {
        decode(self.state.load(Ordering::SeqCst))
    }

    // ── Creation ─────────────────────────────────────────────────

    pub fn create_entity(&self, type_tag: &str) -> Result<ElementId> {
        let entity = Entity::new(type_tag)?;
        let mut staging = self.lock_open("create an entity in")?;
        Ok(staging.stage_new(entity.into()))
    }

    pub fn create_relationship(
        &self,
        type_tag: &str,
        subject: ElementId,
        object: ElementId,
    ) -> Result<ElementId> {
        let relationship = Relationship::new(type_tag, subject, object)?;
        let mut staging = self.lock_open("create a relationship in")?;
        Ok(staging.stage_new(relationship.into()))
    }

    /// Stage an action that happened now.
    pub fn create_action(
        &self,
        type_tag: &str,
        subjects: Vec<ElementId>,
        objects: Vec<ElementId>,
    ) -> Result<ElementId> {
        self.create_action_at(type_tag, subjects, objects, Utc::now())
    }

    pub fn create_action_at(
        &self,
        type_tag: &str,
        subjects: Vec<ElementId>,
        objects: Vec<ElementId>,
        timestamp: DateTime<Utc>,
    ) -> Result<ElementId> {
        let action = Action::new(type_tag, subjects, objects, timestamp)?;
        let mut staging = self.lock_open("create an action in")?;
        Ok(staging.stage_new(action.into()))
    }

    // ── Attributes and groups ────────────────────────────────────

    pub fn set_attribute(&self, id: ElementId, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.modify(id, "set an attribute in", |element| {
            element.attributes_mut().set(name, value)
        })
    }

    /// Remove an attribute value, returning it. The name keeps its type binding.
    pub fn remove_attribute(&self, id: ElementId, name: &str) -> Result<Option<Value>> {
        self.modify(id, "remove an attribute in", |element| {
            Ok(element.attributes_mut().remove(name))
        })
    }

    pub fn attribute(&self, id: ElementId, name: &str) -> Result<Option<Value>> {
        Ok(self
            .element(id)?
            .ok_or(GraphError::NotFound(id))?
            .attributes()
            .get(name)
            .cloned())
    }

    pub fn add_group(&self, id: ElementId, group: &str) -> Result<()> {
        self.modify(id, "add a group in", |element| {
            element.groups_mut().insert(group.to_string());
            Ok(())
        })
    }

    /// Returns whether the group was present.
    pub fn remove_group(&self, id: ElementId, group: &str) -> Result<bool> {
        self.modify(id, "remove a group in", |element| {
            Ok(element.groups_mut().remove(group))
        })
    }

    // ── Deletion ─────────────────────────────────────────────────

    /// Stage `id` for deletion.
    ///
    /// Deleting an element created in this context discards the staged
    /// insert. Deleting a committed entity also deletes every committed
    /// relationship and action that references it. Relationships and actions
    /// created in this context are not cascaded; if they still reference a
    /// deleted entity at commit time the commit fails with
    /// `DanglingReference`.
    pub fn delete(&self, id: ElementId) -> Result<()> {
        let mut staging = self.lock_open("delete from")?;

        if let Some(staged) = staging.elements.get(&id) {
            if staged.deleted {
                return Ok(());
            }
            if staged.is_new() {
                staging.elements.remove(&id);
                tracing::debug!(element_id = %id, "Discarded staged insert");
                return Ok(());
            }
        } else {
            let committed = self.engine.get(id)?.ok_or(GraphError::NotFound(id))?;
            staging.stage_existing(committed);
        }

        let mut visited = HashSet::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let kind = match staging.elements.get_mut(&current) {
                Some(staged) => {
                    staged.deleted = true;
                    staged.current.kind()
                }
                None => continue,
            };
            if kind != ElementKind::Entity {
                continue;
            }

            let dependents = self
                .engine
                .read(&ReadPredicate::any().referencing(current))?;
            for dependent in dependents {
                let dependent_id = dependent.id();
                if !staging.elements.contains_key(&dependent_id) {
                    staging.stage_existing(dependent);
                }
                pending.push(dependent_id);
            }
        }

        tracing::debug!(
            element_id = %id,
            cascaded = visited.len() - 1,
            "Staged deletion"
        );
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// The element as this context sees it: staged state if staged, committed
    /// state otherwise. `None` if it does not exist or is staged for deletion.
    pub fn element(&self, id: ElementId) -> Result<Option<Element>> {
        let staging = self.lock_staging()?;
        if let Some(staged) = staging.elements.get(&id) {
            return Ok((!staged.deleted).then(|| staged.current.clone()));
        }
        drop(staging);
        Ok(self.engine.get(id)?)
    }

    /// The staged snapshot of `id`, or `None` if this context has not touched
    /// it or has staged it for deletion.
    pub fn staged(&self, id: ElementId) -> Result<Option<Element>> {
        let staging = self.lock_staging()?;
        Ok(staging
            .elements
            .get(&id)
            .filter(|s| !s.deleted)
            .map(|s| s.current.clone()))
    }

    /// The ordered operation list a commit would apply right now.
    pub fn pending_operations(&self) -> Result<Vec<Operation>> {
        Ok(self.lock_staging()?.operations())
    }

    pub fn has_pending_changes(&self) -> Result<bool> {
        Ok(!self.pending_operations()?.is_empty())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Validate, order and apply all staged changes as one engine transaction.
    pub fn commit(&self) -> Result<CommitReport> {
        self.begin_commit()?;
        let staging = match self.staging.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.state.store(OPEN, Ordering::SeqCst);
                return Err(GraphError::ConcurrentModification);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        self.commit_staged(staging)
    }

    /// Discard all staged state without contacting the engine.
    pub fn rollback(&self) -> Result<()> {
        let mut staging = self.lock_open("roll back")?;
        staging.clear();
        self.state.store(ROLLED_BACK, Ordering::SeqCst);
        tracing::debug!("Graph context rolled back");
        Ok(())
    }

    /// Return a context rolled back by an engine failure to `Open`, keeping
    /// its staged changes so the commit can be retried.
    pub fn reopen(&self) -> Result<()> {
        self.state
            .compare_exchange(FAILED, OPEN, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|current| GraphError::InvalidState {
                state: decode(current).to_string(),
                operation: "reopen",
            })
    }

    fn begin_commit(&self) -> Result<()> {
        match self
            .state
            .compare_exchange(OPEN, COMMITTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(COMMITTING) => Err(GraphError::ConcurrentModification),
            Err(current) => Err(GraphError::InvalidState {
                state: decode(current).to_string(),
                operation: "commit",
            }),
        }
    }

    fn commit_staged(&self, mut staging: MutexGuard<'_, Staging>) -> Result<CommitReport> {
        let start = Instant::now();
        let commit_id = CommitId::new();
        let committed_at = Utc::now();

        let mut operations = staging.operations();
        if let Err(e) = self.validate(&staging, &operations) {
            self.state.store(OPEN, Ordering::SeqCst);
            tracing::debug!(error = %e, "Commit rejected by validation");
            return Err(e);
        }

        if operations.is_empty() {
            self.state.store(COMMITTED, Ordering::SeqCst);
            return Ok(CommitReport {
                commit_id,
                committed_at,
                changes: Vec::new(),
            });
        }

        for op in operations.iter_mut() {
            if op.kind == OperationKind::Update {
                op.element.touch(committed_at);
            }
        }

        if let Err(e) = self.engine.apply(&operations) {
            let err = GraphError::from(e);
            // The engine re-checks endpoints under its own lock; a commit that
            // lost a race with another context is a validation failure.
            if matches!(err, GraphError::DanglingReference { .. }) {
                self.state.store(OPEN, Ordering::SeqCst);
                tracing::debug!(commit_id = %commit_id, error = %err, "Commit rejected by engine");
                return Err(err);
            }
            self.state.store(FAILED, Ordering::SeqCst);
            tracing::warn!(
                commit_id = %commit_id,
                ops = operations.len(),
                error = %err,
                "Engine rejected commit; context rolled back"
            );
            return Err(err);
        }

        staging.clear();
        self.state.store(COMMITTED, Ordering::SeqCst);
        drop(staging);

        let changes = change_records(commit_id, committed_at, &operations);
        tracing::info!(
            commit_id = %commit_id,
            ops = operations.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Commit applied"
        );

        if let Some(watch) = &self.watch {
            watch.dispatch(changes.clone());
        }

        Ok(CommitReport {
            commit_id,
            committed_at,
            changes,
        })
    }

    /// Every inserted or updated relationship/action must point at entities
    /// that will exist once the operation list is applied.
    fn validate(&self, staging: &Staging, operations: &[Operation]) -> Result<()> {
        for op in operations {
            if op.kind == OperationKind::Delete {
                continue;
            }
            let element_id = op.element.id();
            for target in op.element.references() {
                let kind = match staging.elements.get(&target) {
                    Some(staged) if staged.deleted => None,
                    Some(staged) => Some(staged.current.kind()),
                    None => self.engine.get(target)?.map(|e| e.kind()),
                };
                match kind {
                    Some(ElementKind::Entity) => {}
                    Some(other) => {
                        return Err(GraphError::InvalidEndpoints {
                            kind: op.element.kind().to_string(),
                            reason: format!("{target} is a {other}, not an entity"),
                        })
                    }
                    None => {
                        return Err(GraphError::DanglingReference {
                            element: element_id,
                            missing: target,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    // ── Locking helpers ──────────────────────────────────────────

    fn lock_staging(&self) -> Result<MutexGuard<'_, Staging>> {
        match self.staging.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(GraphError::ConcurrentModification),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    fn lock_open(&self, operation: &'static str) -> Result<MutexGuard<'_, Staging>> {
        let staging = self.lock_staging()?;
        match self.state.load(Ordering::SeqCst) {
            OPEN => Ok(staging),
            COMMITTING => Err(GraphError::ConcurrentModification),
            other => Err(GraphError::InvalidState {
                state: decode(other).to_string(),
                operation,
            }),
        }
    }

    /// Apply `f` to the staged copy of `id`, loading it from the engine on
    /// first touch, and mark it dirty if `f` succeeds.
    fn modify<T>(
        &self,
        id: ElementId,
        operation: &'static str,
        f: impl FnOnce(&mut Element) -> Result<T>,
    ) -> Result<T> {
        let mut staging = self.lock_open(operation)?;

        if !staging.elements.contains_key(&id) {
            let committed = self.engine.get(id)?.ok_or(GraphError::NotFound(id))?;
            staging.stage_existing(committed);
        }

        let staged = staging
            .elements
            .get_mut(&id)
            .ok_or(GraphError::NotFound(id))?;
        if staged.deleted {
            return Err(GraphError::NotFound(id));
        }

        let out = f(&mut staged.current)?;
        if let Origin::Existing(_) = staged.origin {
            staged.dirty = true;
        }
        Ok(out)
    }
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::mpsc;
    use std::thread;

    use graph_engine::{EngineError, MemoryEngine};
    use graph_watch::WatchPredicate;

    fn context() -> (Arc<MemoryEngine>, GraphContext) {
        let engine = Arc::new(MemoryEngine::new());
        let ctx = GraphContext::new(engine.clone(), None);
        (engine, ctx)
    }

    fn snapshot(engine: &MemoryEngine) -> String {
        serde_json::to_string(&engine.export().unwrap()).unwrap()
    }

    /// Commits a fresh graph of two people and a `knows` relationship.
    fn seed(engine: &Arc<MemoryEngine>) -> (ElementId, ElementId, ElementId) {
        let ctx = GraphContext::new(engine.clone(), None);
        let alice = ctx.create_entity("Person").unwrap();
        let bob = ctx.create_entity("Person").unwrap();
        let knows = ctx.create_relationship("knows", alice, bob).unwrap();
        ctx.commit().unwrap();
        (alice, bob, knows)
    }

    #[test]
    fn commit_applies_staged_elements() {
        let (engine, ctx) = context();
        let alice = ctx.create_entity("Person").unwrap();
        ctx.set_attribute(alice, "name", "Alice").unwrap();
        ctx.add_group(alice, "staff").unwrap();

        let report = ctx.commit().unwrap();
        assert_eq!(report.count(OperationKind::Insert), 1);
        assert_eq!(ctx.state(), ContextState::Committed);

        let stored = engine.get(alice).unwrap().unwrap();
        assert_eq!(stored.attributes().get("name"), Some(&Value::from("Alice")));
        assert!(stored.groups().contains("staff"));
    }

    #[test]
    fn empty_commit_is_a_noop() {
        let (engine, ctx) = context();
        let before = snapshot(&engine);
        let report = ctx.commit().unwrap();
        assert!(report.is_empty());
        assert_eq!(ctx.state(), ContextState::Committed);
        assert_eq!(snapshot(&engine), before);
    }

    #[test]
    fn reading_a_committed_element_does_not_stage_an_update() {
        let engine = Arc::new(MemoryEngine::new());
        let (alice, _, _) = seed(&engine);

        let ctx = GraphContext::new(engine.clone(), None);
        assert!(ctx.element(alice).unwrap().is_some());
        assert!(ctx.attribute(alice, "name").unwrap().is_none());
        assert!(ctx.staged(alice).unwrap().is_none());
        assert!(!ctx.has_pending_changes().unwrap());

        ctx.add_group(alice, "vip").unwrap();
        let staged = ctx.staged(alice).unwrap().unwrap();
        assert!(staged.groups().contains("vip"));
    }

    #[test]
    fn updates_touch_committed_elements() {
        let engine = Arc::new(MemoryEngine::new());
        let (alice, _, _) = seed(&engine);
        let created = engine.get(alice).unwrap().unwrap().updated_at();

        let ctx = GraphContext::new(engine.clone(), None);
        ctx.set_attribute(alice, "age", 31_i64).unwrap();
        let report = ctx.commit().unwrap();
        assert_eq!(report.count(OperationKind::Update), 1);

        let stored = engine.get(alice).unwrap().unwrap();
        assert_eq!(stored.attributes().get("age"), Some(&Value::Number(31.0)));
        assert!(stored.updated_at() >= created);
    }

    #[test]
    fn type_mismatch_leaves_staged_value_alone() {
        let (_, ctx) = context();
        let alice = ctx.create_entity("Person").unwrap();
        ctx.set_attribute(alice, "age", 30_i64).unwrap();

        let err = ctx.set_attribute(alice, "age", "thirty").unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
        assert_eq!(ctx.attribute(alice, "age").unwrap(), Some(Value::Number(30.0)));
    }

    #[test]
    fn touching_an_unknown_element_is_not_found() {
        let (_, ctx) = context();
        let ghost = ElementId::new();
        assert_eq!(
            ctx.set_attribute(ghost, "k", true).unwrap_err(),
            GraphError::NotFound(ghost)
        );
        assert_eq!(ctx.delete(ghost).unwrap_err(), GraphError::NotFound(ghost));
    }

    #[test]
    fn dangling_reference_fails_commit_and_keeps_context_open() {
        let (engine, ctx) = context();
        let before = snapshot(&engine);

        let alice = ctx.create_entity("Person").unwrap();
        let ghost = ElementId::new();
        let rel = ctx.create_relationship("knows", alice, ghost).unwrap();

        let err = ctx.commit().unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingReference {
                element: rel,
                missing: ghost
            }
        );
        assert_eq!(ctx.state(), ContextState::Open);
        assert_eq!(snapshot(&engine), before);

        // Fixing the problem lets the same context commit.
        ctx.delete(rel).unwrap();
        ctx.commit().unwrap();
        assert!(engine.get(alice).unwrap().is_some());
    }

    #[test]
    fn relationship_to_a_relationship_is_rejected() {
        let engine = Arc::new(MemoryEngine::new());
        let (alice, _, knows) = seed(&engine);

        let ctx = GraphContext::new(engine.clone(), None);
        ctx.create_relationship("about", alice, knows).unwrap();
        assert!(matches!(
            ctx.commit().unwrap_err(),
            GraphError::InvalidEndpoints { .. }
        ));
    }

    #[test]
    fn deleting_an_entity_cascades_to_committed_dependents() {
        let engine = Arc::new(MemoryEngine::new());
        let (alice, bob, knows) = seed(&engine);

        let setup = GraphContext::new(engine.clone(), None);
        let met = setup
            .create_action("met", vec![alice], vec![bob])
            .unwrap();
        setup.commit().unwrap();

        let ctx = GraphContext::new(engine.clone(), None);
        ctx.delete(alice).unwrap();
        assert!(ctx.element(knows).unwrap().is_none());

        let report = ctx.commit().unwrap();
        assert_eq!(report.count(OperationKind::Delete), 3);
        // Dependents go first.
        assert_eq!(report.changes[2].element_id(), alice);

        assert!(engine.get(alice).unwrap().is_none());
        assert!(engine.get(knows).unwrap().is_none());
        assert!(engine.get(met).unwrap().is_none());
        assert!(engine.get(bob).unwrap().is_some());
    }

    #[test]
    fn staged_relationship_to_deleted_entity_fails_commit() {
        let engine = Arc::new(MemoryEngine::new());
        let (alice, bob, _) = seed(&engine);

        let ctx = GraphContext::new(engine.clone(), None);
        let rel = ctx.create_relationship("likes", bob, alice).unwrap();
        ctx.delete(alice).unwrap();

        assert_eq!(
            ctx.commit().unwrap_err(),
            GraphError::DanglingReference {
                element: rel,
                missing: alice
            }
        );
    }

    #[test]
    fn deleting_a_staged_insert_discards_it() {
        let (engine, ctx) = context();
        let temp = ctx.create_entity("Temp").unwrap();
        ctx.delete(temp).unwrap();
        ctx.delete(temp).unwrap_err();
        assert!(ctx.pending_operations().unwrap().is_empty());
        ctx.commit().unwrap();
        assert!(engine.is_empty().unwrap());
    }

    #[test]
    fn deleting_twice_is_idempotent() {
        let engine = Arc::new(MemoryEngine::new());
        let (_, bob, _) = seed(&engine);
        let ctx = GraphContext::new(engine.clone(), None);
        ctx.delete(bob).unwrap();
        ctx.delete(bob).unwrap();
        assert_eq!(
            ctx.set_attribute(bob, "k", 1_i64).unwrap_err(),
            GraphError::NotFound(bob)
        );
    }

    #[test]
    fn rollback_discards_everything() {
        let engine = Arc::new(MemoryEngine::new());
        let (alice, bob, _) = seed(&engine);
        let before = snapshot(&engine);

        let ctx = GraphContext::new(engine.clone(), None);
        ctx.create_entity("Person").unwrap();
        ctx.set_attribute(bob, "name", "Bob").unwrap();
        ctx.delete(alice).unwrap();
        ctx.rollback().unwrap();

        assert_eq!(ctx.state(), ContextState::RolledBack);
        assert_eq!(snapshot(&engine), before);
    }

    #[test]
    fn finished_contexts_reject_further_work() {
        let (_, ctx) = context();
        ctx.commit().unwrap();
        assert!(matches!(
            ctx.create_entity("Person").unwrap_err(),
            GraphError::InvalidState { .. }
        ));
        assert!(matches!(
            ctx.commit().unwrap_err(),
            GraphError::InvalidState { .. }
        ));
        assert!(matches!(
            ctx.rollback().unwrap_err(),
            GraphError::InvalidState { .. }
        ));

        let (_, rolled) = context();
        rolled.rollback().unwrap();
        assert!(matches!(
            rolled.commit().unwrap_err(),
            GraphError::InvalidState { .. }
        ));
        assert!(matches!(
            rolled.reopen().unwrap_err(),
            GraphError::InvalidState { .. }
        ));
    }

    /// Delegates to a memory engine but fails `apply` while `fail` is set.
    #[derive(Default)]
    struct FlakyEngine {
        inner: MemoryEngine,
        fail: AtomicBool,
    }

    impl Engine for FlakyEngine {
        fn apply(&self, operations: &[Operation]) -> std::result::Result<(), EngineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::Unavailable("disk on fire".into()));
            }
            self.inner.apply(operations)
        }

        fn read(&self, predicate: &ReadPredicate) -> std::result::Result<Vec<Element>, EngineError> {
            self.inner.read(predicate)
        }

        fn get(&self, id: ElementId) -> std::result::Result<Option<Element>, EngineError> {
            self.inner.get(id)
        }
    }

    #[test]
    fn engine_failure_rolls_back_and_reopen_retries() {
        let engine = Arc::new(FlakyEngine::default());
        engine.fail.store(true, Ordering::SeqCst);

        let ctx = GraphContext::new(engine.clone(), None);
        let alice = ctx.create_entity("Person").unwrap();

        assert!(matches!(
            ctx.commit().unwrap_err(),
            GraphError::EngineFailure { .. }
        ));
        assert_eq!(ctx.state(), ContextState::RolledBack);
        assert!(engine.get(alice).unwrap().is_none());

        engine.fail.store(false, Ordering::SeqCst);
        ctx.reopen().unwrap();
        assert_eq!(ctx.pending_operations().unwrap().len(), 1);
        ctx.commit().unwrap();
        assert!(engine.get(alice).unwrap().is_some());
    }

    /// Blocks the first `apply` until released, so a commit can be held open
    /// while other contexts commit.
    struct GateEngine {
        inner: MemoryEngine,
        armed: AtomicBool,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl GateEngine {
        fn new(inner: MemoryEngine) -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let engine = Arc::new(Self {
                inner,
                armed: AtomicBool::new(true),
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            });
            (engine, entered_rx, release_tx)
        }
    }

    impl Engine for GateEngine {
        fn apply(&self, operations: &[Operation]) -> std::result::Result<(), EngineError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.apply(operations)
        }

        fn read(&self, predicate: &ReadPredicate) -> std::result::Result<Vec<Element>, EngineError> {
            self.inner.read(predicate)
        }

        fn get(&self, id: ElementId) -> std::result::Result<Option<Element>, EngineError> {
            self.inner.get(id)
        }
    }

    #[test]
    fn overlapping_calls_during_commit_are_rejected() {
        let (engine, entered_rx, release_tx) = GateEngine::new(MemoryEngine::new());

        let ctx = GraphContext::new(engine.clone(), None);
        let alice = ctx.create_entity("Person").unwrap();

        thread::scope(|scope| {
            let committing = scope.spawn(|| ctx.commit());
            entered_rx.recv().unwrap();

            assert_eq!(ctx.state(), ContextState::Committing);
            assert_eq!(
                ctx.create_entity("Person").unwrap_err(),
                GraphError::ConcurrentModification
            );
            assert_eq!(
                ctx.set_attribute(alice, "k", 1_i64).unwrap_err(),
                GraphError::ConcurrentModification
            );
            assert_eq!(ctx.commit().unwrap_err(), GraphError::ConcurrentModification);
            assert_eq!(ctx.rollback().unwrap_err(), GraphError::ConcurrentModification);

            release_tx.send(()).unwrap();
            committing.join().unwrap().unwrap();
        });

        assert_eq!(ctx.state(), ContextState::Committed);
        assert!(engine.get(alice).unwrap().is_some());
    }

    #[test]
    fn successful_commit_notifies_watchers_and_failed_one_does_not() {
        let engine = Arc::new(MemoryEngine::new());
        let watch = Arc::new(WatchRegistry::inline());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = Arc::new(move |_: &ChangeRecord| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let _sub = watch.subscribe(WatchPredicate::any().of_type("Person"), &handler);

        let bad = GraphContext::new(engine.clone(), Some(watch.clone()));
        let p = bad.create_entity("Person").unwrap();
        bad.create_relationship("knows", p, ElementId::new()).unwrap();
        bad.commit().unwrap_err();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        let good = GraphContext::new(engine.clone(), Some(watch.clone()));
        good.create_entity("Person").unwrap();
        good.create_entity("Person").unwrap();
        good.create_entity("Company").unwrap();
        good.commit().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    /// Commits `Person` entities `a` and `b` straight to the engine.
    fn two_people() -> (MemoryEngine, ElementId, ElementId) {
        let inner = MemoryEngine::new();
        let a = Entity::new("Person").unwrap();
        let b = Entity::new("Person").unwrap();
        let (a_id, b_id) = (a.id, b.id);
        inner
            .apply(&[Operation::insert(a.into()), Operation::insert(b.into())])
            .unwrap();
        (inner, a_id, b_id)
    }

    #[test]
    fn endpoint_deleted_by_a_racing_commit_is_dangling() {
        let (inner, a, b) = two_people();
        let (engine, entered_rx, release_tx) = GateEngine::new(inner);

        let first = GraphContext::new(engine.clone(), None);
        let knows = first.create_relationship("knows", a, b).unwrap();

        thread::scope(|scope| {
            let committing = scope.spawn(|| first.commit());
            entered_rx.recv().unwrap();

            let second = GraphContext::new(engine.clone(), None);
            second.delete(b).unwrap();
            second.commit().unwrap();

            release_tx.send(()).unwrap();
            assert_eq!(
                committing.join().unwrap().unwrap_err(),
                GraphError::DanglingReference {
                    element: knows,
                    missing: b
                }
            );
        });

        assert_eq!(first.state(), ContextState::Open);
        assert!(engine.get(knows).unwrap().is_none());
        assert!(engine.get(b).unwrap().is_none());
    }

    #[test]
    fn entity_gaining_a_relationship_mid_commit_is_not_deleted() {
        let (inner, a, b) = two_people();
        let (engine, entered_rx, release_tx) = GateEngine::new(inner);

        let first = GraphContext::new(engine.clone(), None);
        first.delete(b).unwrap();

        thread::scope(|scope| {
            let committing = scope.spawn(|| first.commit());
            entered_rx.recv().unwrap();

            let second = GraphContext::new(engine.clone(), None);
            let knows = second.create_relationship("knows", a, b).unwrap();
            second.commit().unwrap();

            release_tx.send(()).unwrap();
            assert_eq!(
                committing.join().unwrap().unwrap_err(),
                GraphError::DanglingReference {
                    element: knows,
                    missing: b
                }
            );
        });

        assert_eq!(first.state(), ContextState::Open);
        assert!(engine.get(b).unwrap().is_some());
    }
}
