//! graph-engine: Transactional persistence for the object graph.
//!
//! The core treats its engine as an opaque store that applies an operation
//! list atomically and answers predicate reads. Two engines ship here: an
//! in-memory map and a JSON file store layered on top of it.

pub mod engine;
pub mod file;
pub mod memory;

pub use engine::{Engine, EngineError};
pub use file::FileEngine;
pub use memory::MemoryEngine;
