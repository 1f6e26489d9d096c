//! In-process engine backed by a hash map behind a single `RwLock`.
//!
//! Every `apply` validates the full operation list before touching state, so
//! a rejected list leaves the store untouched. Validation runs under the write
//! lock and covers relationship and action endpoints, so concurrent writers
//! cannot leave an edge pointing at a deleted entity.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use graph_core::{Element, ElementId, ElementKind, Operation, OperationKind, ReadPredicate};

use crate::engine::{Engine, EngineError};

#[derive(Debug, Clone)]
struct Stored {
    /// Insertion sequence; read order.
    seq: u64,
    element: Element,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    elements: HashMap<ElementId, Stored>,
    next_seq: u64,
}

impl MemoryState {
    fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    fn kind_of(&self, id: &ElementId) -> Option<ElementKind> {
        self.elements.get(id).map(|s| s.element.kind())
    }

    fn validate(&self, operations: &[Operation]) -> Result<(), EngineError> {
        // Kind of each touched id as seen part-way through the list; `None`
        // once deleted.
        let mut present: HashMap<ElementId, Option<ElementKind>> = HashMap::new();
        for op in operations {
            let id = op.element.id();
            let exists = present
                .get(&id)
                .map(Option::is_some)
                .unwrap_or_else(|| self.contains(&id));
            match op.kind {
                OperationKind::Insert if exists => return Err(EngineError::Conflict(id)),
                OperationKind::Update | OperationKind::Delete if !exists => {
                    return Err(EngineError::Missing(id))
                }
                _ => {}
            }
            let after = (op.kind != OperationKind::Delete).then(|| op.element.kind());
            present.insert(id, after);
        }

        self.validate_endpoints(operations, &present)
    }

    /// Every relationship and action left after the list is applied must
    /// point at entities that are also left.
    fn validate_endpoints(
        &self,
        operations: &[Operation],
        present: &HashMap<ElementId, Option<ElementKind>>,
    ) -> Result<(), EngineError> {
        let kind_after = |id: &ElementId| match present.get(id) {
            Some(kind) => *kind,
            None => self.kind_of(id),
        };

        for op in operations {
            let id = op.element.id();
            if op.kind == OperationKind::Delete || kind_after(&id).is_none() {
                continue;
            }
            for target in op.element.references() {
                if kind_after(&target) != Some(ElementKind::Entity) {
                    return Err(EngineError::DanglingEndpoint {
                        element: id,
                        missing: target,
                    });
                }
            }
        }

        let removed: HashSet<ElementId> = present
            .iter()
            .filter(|(id, after)| after.is_none() && self.kind_of(id) == Some(ElementKind::Entity))
            .map(|(id, _)| *id)
            .collect();
        if removed.is_empty() {
            return Ok(());
        }
        for stored in self.ordered() {
            let id = stored.element.id();
            if present.contains_key(&id) {
                continue;
            }
            if let Some(target) = stored
                .element
                .references()
                .into_iter()
                .find(|target| removed.contains(target))
            {
                return Err(EngineError::DanglingEndpoint {
                    element: id,
                    missing: target,
                });
            }
        }
        Ok(())
    }

    fn mutate(&mut self, operations: &[Operation]) {
        for op in operations {
            let id = op.element.id();
            match op.kind {
                OperationKind::Insert => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.elements.insert(
                        id,
                        Stored {
                            seq,
                            element: op.element.clone(),
                        },
                    );
                }
                OperationKind::Update => {
                    if let Some(stored) = self.elements.get_mut(&id) {
                        stored.element = op.element.clone();
                    }
                }
                OperationKind::Delete => {
                    self.elements.remove(&id);
                }
            }
        }
    }

    fn ordered(&self) -> Vec<&Stored> {
        let mut stored: Vec<&Stored> = self.elements.values().collect();
        stored.sort_by_key(|s| s.seq);
        stored
    }
}

/// Thread-safe in-memory engine.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: RwLock<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine preloaded with `elements`, read order following the input.
    pub fn from_elements(elements: Vec<Element>) -> Self {
        let mut state = MemoryState::default();
        for element in elements {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.elements.insert(element.id(), Stored { seq, element });
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// All stored elements in read order.
    pub fn export(&self) -> Result<Vec<Element>, EngineError> {
        let state = self.read_state()?;
        Ok(state
            .ordered()
            .into_iter()
            .map(|s| s.element.clone())
            .collect())
    }

    pub fn len(&self) -> Result<usize, EngineError> {
        Ok(self.read_state()?.elements.len())
    }

    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }

    /// Apply `operations`, calling `persist` with the resulting element set
    /// before the new state becomes visible. A `persist` error leaves the
    /// in-memory state untouched.
    pub(crate) fn apply_then<F>(
        &self,
        operations: &[Operation],
        persist: F,
    ) -> Result<(), EngineError>
    where
        F: FnOnce(&[Element]) -> Result<(), EngineError>,
    {
        let mut state = self.write_state()?;
        state.validate(operations)?;

        let mut next = state.clone();
        next.mutate(operations);
        let elements: Vec<Element> = next.ordered().into_iter().map(|s| s.element.clone()).collect();
        persist(&elements)?;

        *state = next;
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, EngineError> {
        self.state
            .read()
            .map_err(|_| EngineError::Unavailable("memory engine lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, EngineError> {
        self.state
            .write()
            .map_err(|_| EngineError::Unavailable("memory engine lock poisoned".to_string()))
    }
}

impl Engine for MemoryEngine {
    fn apply(&self, operations: &[Operation]) -> Result<(), EngineError> {
        let mut state = self.write_state()?;
        state.validate(operations)?;
        state.mutate(operations);
        tracing::trace!(ops = operations.len(), "Memory engine applied operations");
        Ok(())
    }

    fn read(&self, predicate: &ReadPredicate) -> Result<Vec<Element>, EngineError> {
        let state = self.read_state()?;
        Ok(state
            .ordered()
            .into_iter()
            .map(|s| &s.element)
            .filter(|e| predicate.matches(e))
            .cloned()
            .collect())
    }

    fn get(&self, id: ElementId) -> Result<Option<Element>, EngineError> {
        let state = self.read_state()?;
        Ok(state.elements.get(&id).map(|s| s.element.clone()))
    }
}
