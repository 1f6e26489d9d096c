//! Graph: an embedded object-graph store.
//!
//! Typed entities are connected by typed, directed relationships and
//! timestamped actions. Changes are staged in a [`GraphContext`] and committed
//! as one transaction; watchers registered on the [`WatchRegistry`] hear about
//! every committed change; the [`QueryFacade`] reads committed state.
//!
//! ```no_run
//! use graph::{Graph, ReadPredicate};
//!
//! # fn main() -> graph::Result<()> {
//! let graph = Graph::in_memory();
//! let ctx = graph.context();
//! let alice = ctx.create_entity("Person")?;
//! ctx.set_attribute(alice, "name", "Alice")?;
//! ctx.commit()?;
//!
//! let people = graph.query().fetch(&ReadPredicate::any().of_type("Person"))?;
//! assert_eq!(people.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub use graph_core::{
    Action, AttributeStore, ChangeRecord, CommitId, DispatchMode, Element, ElementId,
    ElementKind, Entity, GraphError, GraphSettings, Operation, OperationKind, ReadMode,
    ReadPredicate, Relationship, Result, Value, ValueType,
};
pub use graph_engine::{Engine, EngineError, FileEngine, MemoryEngine};
pub use graph_query::{
    DeferredQuery, Direction, QueryCanceller, QueryFacade, QueryHandle, Reached, Traversal,
};
pub use graph_session::{CommitReport, ContextState, GraphContext};
pub use graph_watch::{Subscription, SubscriptionId, WatchHandler, WatchPredicate, WatchRegistry};

/// A graph instance: one engine, one watch registry, one set of settings.
///
/// Cheap to clone; clones share the engine and registry.
#[derive(Clone)]
pub struct Graph {
    engine: Arc<dyn Engine>,
    watch: Arc<WatchRegistry>,
    settings: GraphSettings,
}

impl Graph {
    /// An empty in-memory graph with default settings.
    pub fn in_memory() -> Self {
        Self {
            engine: Arc::new(MemoryEngine::new()),
            watch: Arc::new(WatchRegistry::inline()),
            settings: GraphSettings::default(),
        }
    }

    /// A graph over any engine. Background dispatch needs a tokio runtime.
    pub fn with_engine(engine: Arc<dyn Engine>, settings: GraphSettings) -> Result<Self> {
        let watch = Arc::new(WatchRegistry::new(settings.dispatch)?);
        Ok(Self {
            engine,
            watch,
            settings,
        })
    }

    /// A graph persisted to the JSON store at `settings.store_path`.
    pub fn open(settings: GraphSettings) -> Result<Self> {
        let engine = FileEngine::open(&settings.store_path)?;
        tracing::info!(
            path = %settings.store_path,
            elements = engine.len()?,
            dispatch = ?settings.dispatch,
            "Graph store opened"
        );
        Self::with_engine(Arc::new(engine), settings)
    }

    /// Open a new unit of work.
    pub fn context(&self) -> GraphContext {
        GraphContext::new(self.engine.clone(), Some(self.watch.clone()))
    }

    pub fn query(&self) -> QueryFacade {
        QueryFacade::with_settings(self.engine.clone(), &self.settings)
    }

    pub fn watch(&self) -> &Arc<WatchRegistry> {
        &self.watch
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("settings", &self.settings)
            .field("watch", &self.watch)
            .finish_non_exhaustive()
    }
}
