use thiserror::Error;

use crate::attributes::ValueType;
use crate::types::ElementId;

/// Top-level error type for the Graph object store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Type mismatch on attribute '{name}': bound to {bound}, got {attempted}")]
    TypeMismatch {
        name: String,
        bound: ValueType,
        attempted: ValueType,
    },

    #[error("Attribute '{name}' must be a finite number")]
    NonFiniteNumber { name: String },

    #[error("Dangling reference: {element} references missing entity {missing}")]
    DanglingReference {
        element: ElementId,
        missing: ElementId,
    },

    #[error("Concurrent modification of graph context")]
    ConcurrentModification,

    #[error("Engine failure: {reason}")]
    EngineFailure { reason: String },

    #[error("Invalid state: cannot {operation} a context that is {state}")]
    InvalidState {
        state: String,
        operation: &'static str,
    },

    #[error("Element not found: {0}")]
    NotFound(ElementId),

    #[error("Type tag must be a non-empty string")]
    InvalidTypeTag,

    #[error("Invalid endpoints for {kind}: {reason}")]
    InvalidEndpoints { kind: String, reason: String },

    #[error("Query cancelled")]
    QueryCancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for GraphError {
    fn from(err: config::ConfigError) -> Self {
        GraphError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
