//! graph-session: Graph contexts and the commit pipeline.
//!
//! A [`GraphContext`] stages mutations against an [`Engine`](graph_engine::Engine),
//! validates referential integrity, applies the ordered operation list as a
//! single transaction and notifies the watch registry.

pub mod context;
mod staging;

pub use context::{CommitReport, ContextState, GraphContext};
