//! The query façade.

use std::sync::Arc;

use graph_core::{
    Element, ElementId, GraphSettings, OperationKind, ReadMode, ReadPredicate, Result,
};
use graph_engine::Engine;
use graph_session::GraphContext;

use crate::deferred::{DeferredQuery, QueryHandle};
use crate::traverse::{self, Reached, Traversal};

/// Read-only access to committed graph state.
///
/// Cheap to clone; clones share the engine.
#[derive(Clone)]
pub struct QueryFacade {
    engine: Arc<dyn Engine>,
    read_mode: ReadMode,
    traversal_max_depth: usize,
}

impl QueryFacade {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_settings(engine, &GraphSettings::default())
    }

    pub fn with_settings(engine: Arc<dyn Engine>, settings: &GraphSettings) -> Self {
        Self {
            engine,
            read_mode: settings.read_mode,
            traversal_max_depth: settings.traversal_max_depth,
        }
    }

    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    // ── Immediate ────────────────────────────────────────────────

    /// All committed elements matching `predicate`, in first-commit order.
    pub fn fetch(&self, predicate: &ReadPredicate) -> Result<Vec<Element>> {
        let elements = self.engine.read(predicate)?;
        tracing::debug!(matched = elements.len(), "Query completed");
        Ok(elements)
    }

    pub fn fetch_one(&self, predicate: &ReadPredicate) -> Result<Option<Element>> {
        Ok(self.engine.read(predicate)?.into_iter().next())
    }

    pub fn get(&self, id: ElementId) -> Result<Option<Element>> {
        Ok(self.engine.get(id)?)
    }

    pub fn count(&self, predicate: &ReadPredicate) -> Result<usize> {
        Ok(self.engine.count(predicate)?)
    }

    // ── Deferred ─────────────────────────────────────────────────

    /// Start `predicate` on the blocking pool and return an awaitable handle.
    /// Must be called from within a tokio runtime.
    pub fn fetch_deferred(&self, predicate: ReadPredicate) -> Result<DeferredQuery> {
        DeferredQuery::spawn(self.engine.clone(), predicate)
    }

    /// Start `predicate` on the blocking pool and pass the result to `callback`.
    pub fn fetch_with_callback<F>(&self, predicate: ReadPredicate, callback: F) -> Result<QueryHandle>
    where
        F: FnOnce(Result<Vec<Element>>) + Send + 'static,
    {
        QueryHandle::spawn(self.engine.clone(), predicate, callback)
    }

    // ── Traversal ────────────────────────────────────────────────

    /// Breadth-first walk from `start`. One engine read per entity expanded
    /// and direction followed; there is no adjacency index.
    pub fn traverse(&self, start: ElementId, traversal: &Traversal) -> Result<Vec<Reached>> {
        traverse::traverse(
            self.engine.as_ref(),
            start,
            traversal,
            self.traversal_max_depth,
        )
    }

    // ── Context-scoped reads ─────────────────────────────────────

    /// Read as seen from `ctx` under the configured read mode.
    pub fn fetch_in_context(
        &self,
        ctx: &GraphContext,
        predicate: &ReadPredicate,
    ) -> Result<Vec<Element>> {
        match self.read_mode {
            ReadMode::Committed => self.fetch(predicate),
            ReadMode::IncludeStaged => self.fetch_including_staged(ctx, predicate),
        }
    }

    /// Committed results with `ctx`'s pending operations laid over them.
    ///
    /// Staged deletions disappear, staged updates replace their committed
    /// version (or drop out if they no longer match), and matching staged
    /// inserts are appended in staging order.
    pub fn fetch_including_staged(
        &self,
        ctx: &GraphContext,
        predicate: &ReadPredicate,
    ) -> Result<Vec<Element>> {
        let mut elements = self.engine.read(predicate)?;

        for op in ctx.pending_operations()? {
            let id = op.element.id();
            let position = elements.iter().position(|e| e.id() == id);
            let matches = predicate.matches(&op.element);

            match (op.kind, position) {
                (OperationKind::Delete, Some(i)) => {
                    elements.remove(i);
                }
                (OperationKind::Delete, None) => {}
                (_, Some(i)) if matches => elements[i] = op.element,
                (_, Some(i)) => {
                    elements.remove(i);
                }
                (_, None) if matches => elements.push(op.element),
                (_, None) => {}
            }
        }

        Ok(elements)
    }
}

impl std::fmt::Debug for QueryFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFacade")
            .field("read_mode", &self.read_mode)
            .field("traversal_max_depth", &self.traversal_max_depth)
            .finish_non_exhaustive()
    }
}
