//! graph-core: Element model, attribute store, errors and settings for the Graph object store.
//!
//! This crate provides the foundational types used across all Graph components:
//! - Entity, Relationship and Action elements with typed attributes
//! - Operations (the unit applied by a persistence engine) and read predicates
//! - Change records emitted after a commit
//! - Settings loading
//! - The shared error taxonomy

pub mod attributes;
pub mod config;
pub mod error;
pub mod events;
pub mod predicate;
pub mod types;

pub use attributes::{AttributeStore, Value, ValueType};
pub use self::config::{DispatchMode, GraphSettings, ReadMode};
pub use error::{GraphError, Result};
pub use events::{ChangeRecord, CommitId};
pub use predicate::ReadPredicate;
pub use types::{
    Action, Element, ElementId, ElementKind, Entity, Operation, OperationKind, Relationship,
};
