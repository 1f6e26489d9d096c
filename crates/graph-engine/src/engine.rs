//! The boundary between the graph core and its persistence engine.

use graph_core::{Element, ElementId, GraphError, Operation, ReadPredicate};

/// Errors reported by a persistence engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Element {0} already exists")]
    Conflict(ElementId),

    #[error("Element {0} does not exist")]
    Missing(ElementId),

    #[error("Element {element} would reference {missing}, which is not a live entity")]
    DanglingEndpoint {
        element: ElementId,
        missing: ElementId,
    },

    #[error("Integrity check failed for store {path}: stored hash does not match content")]
    Integrity { path: String },

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<EngineError> for GraphError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::DanglingEndpoint { element, missing } => {
                GraphError::DanglingReference { element, missing }
            }
            other => GraphError::EngineFailure {
                reason: other.to_string(),
            },
        }
    }
}

/// A transactional element store.
///
/// `apply` is all-or-nothing across the whole operation list and must reject
/// a list that would leave a relationship or action pointing at anything but
/// a live entity. `read` returns elements in the order they were first
/// inserted.
pub trait Engine: Send + Sync {
    fn apply(&self, operations: &[Operation]) -> Result<(), EngineError>;

    fn read(&self, predicate: &ReadPredicate) -> Result<Vec<Element>, EngineError>;

    fn get(&self, id: ElementId) -> Result<Option<Element>, EngineError>;

    fn count(&self, predicate: &ReadPredicate) -> Result<usize, EngineError> {
        Ok(self.read(predicate)?.len())
    }
}
