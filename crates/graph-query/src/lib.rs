//! graph-query: Read access to committed graph state.
//!
//! The [`QueryFacade`] reads straight from the engine, independent of any
//! open context. Queries run immediately, deferred on tokio's blocking pool,
//! or as breadth-first traversals over relationships.

pub mod deferred;
pub mod facade;
pub mod traverse;

pub use deferred::{DeferredQuery, QueryCanceller, QueryHandle};
pub use facade::QueryFacade;
pub use traverse::{Direction, Reached, Traversal};
