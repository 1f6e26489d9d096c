//! Deferred queries run on tokio's blocking pool.
//!
//! Cancellation is best-effort: the read may still run to completion, but once
//! `cancel` returns its result is never delivered.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use graph_core::{Element, GraphError, ReadPredicate, Result};
use graph_engine::Engine;

/// Shared cancellation flag for one deferred query.
///
/// Delivery happens while the flag's lock is held, so `cancel` cannot return
/// while a result is being handed over.
#[derive(Debug, Clone, Default)]
pub struct QueryCanceller {
    cancelled: Arc<Mutex<bool>>,
}

impl QueryCanceller {
    pub fn cancel(&self) {
        *self.lock() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Awaitable handle to a query running in the background.
#[derive(Debug)]
pub struct DeferredQuery {
    canceller: QueryCanceller,
    rx: oneshot::Receiver<Result<Vec<Element>>>,
}

impl DeferredQuery {
    pub(crate) fn spawn(engine: Arc<dyn Engine>, predicate: ReadPredicate) -> Result<Self> {
        let runtime = current_runtime()?;
        let canceller = QueryCanceller::default();
        let (tx, rx) = oneshot::channel();

        let flag = canceller.clone();
        runtime.spawn_blocking(move || {
            let result = run(engine.as_ref(), &predicate);
            let cancelled = flag.lock();
            if *cancelled {
                tracing::debug!("Deferred query finished after cancellation; result dropped");
                return;
            }
            let _ = tx.send(result);
        });

        Ok(Self { canceller, rx })
    }

    /// Request cancellation. After this returns, `wait` yields `QueryCancelled`.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    /// A cloneable handle that can cancel this query from elsewhere while it
    /// is being awaited.
    pub fn canceller(&self) -> QueryCanceller {
        self.canceller.clone()
    }

    pub async fn wait(self) -> Result<Vec<Element>> {
        let DeferredQuery { canceller, rx } = self;
        if canceller.is_cancelled() {
            return Err(GraphError::QueryCancelled);
        }
        match rx.await {
            Ok(result) if !canceller.is_cancelled() => result,
            _ => Err(GraphError::QueryCancelled),
        }
    }
}

/// Handle to a query whose result goes to a callback.
#[derive(Debug)]
pub struct QueryHandle {
    canceller: QueryCanceller,
    task: JoinHandle<()>,
}

impl QueryHandle {
    /// Runs `callback` with the result unless cancelled first. The callback
    /// runs on the blocking pool; `cancel` waits for a running callback to
    /// return, so the callback must not cancel its own query.
    pub(crate) fn spawn<F>(
        engine: Arc<dyn Engine>,
        predicate: ReadPredicate,
        callback: F,
    ) -> Result<Self>
    where
        F: FnOnce(Result<Vec<Element>>) + Send + 'static,
    {
        let runtime = current_runtime()?;
        let canceller = QueryCanceller::default();

        let flag = canceller.clone();
        let task = runtime.spawn_blocking(move || {
            let result = run(engine.as_ref(), &predicate);
            let cancelled = flag.lock();
            if *cancelled {
                tracing::debug!("Query callback skipped after cancellation");
                return;
            }
            callback(result);
        });

        Ok(Self { canceller, task })
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    /// Resolve once the background read (and callback, if delivered) is done.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Query callback task failed");
        }
    }
}

fn current_runtime() -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        GraphError::Config("deferred queries require a tokio runtime".to_string())
    })
}

fn run(engine: &dyn Engine, predicate: &ReadPredicate) -> Result<Vec<Element>> {
    let elements = engine.read(predicate)?;
    tracing::debug!(matched = elements.len(), "Deferred query completed");
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    use graph_core::{ElementId, Entity, Operation};
    use graph_engine::{EngineError, MemoryEngine};

    fn seeded() -> Arc<MemoryEngine> {
        let engine = Arc::new(MemoryEngine::new());
        let ops: Vec<Operation> = ["Person", "Person", "Company"]
            .iter()
            .map(|tag| Operation::insert(Entity::new(tag).unwrap().into()))
            .collect();
        engine.apply(&ops).unwrap();
        engine
    }

    /// Holds `read` until released, so cancellation can race a running query.
    struct SlowEngine {
        inner: MemoryEngine,
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Engine for SlowEngine {
        fn apply(&self, operations: &[Operation]) -> std::result::Result<(), EngineError> {
            self.inner.apply(operations)
        }

        fn read(&self, predicate: &ReadPredicate) -> std::result::Result<Vec<Element>, EngineError> {
            self.started.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.read(predicate)
        }

        fn get(&self, id: ElementId) -> std::result::Result<Option<Element>, EngineError> {
            self.inner.get(id)
        }
    }

    #[tokio::test]
    async fn deferred_query_delivers_result() {
        let query = DeferredQuery::spawn(seeded(), ReadPredicate::any().of_type("Person")).unwrap();
        assert_eq!(query.wait().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_wait_yields_cancelled() {
        let query = DeferredQuery::spawn(seeded(), ReadPredicate::any()).unwrap();
        query.cancel();
        assert!(query.is_cancelled());
        assert_eq!(query.wait().await.unwrap_err(), GraphError::QueryCancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_while_running_suppresses_callback() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let engine = Arc::new(SlowEngine {
            inner: MemoryEngine::new(),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });

        let (delivered_tx, delivered_rx) = mpsc::channel();
        let handle = QueryHandle::spawn(engine, ReadPredicate::any(), move |result| {
            delivered_tx.send(result).unwrap();
        })
        .unwrap();

        tokio::task::spawn_blocking(move || started_rx.recv().unwrap())
            .await
            .unwrap();
        handle.cancel();
        release_tx.send(()).unwrap();
        handle.finished().await;

        assert!(delivered_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn callback_receives_result() {
        let (tx, rx) = mpsc::channel();
        let handle = QueryHandle::spawn(seeded(), ReadPredicate::entities(), move |result| {
            tx.send(result.map(|e| e.len())).unwrap();
        })
        .unwrap();
        handle.finished().await;
        assert_eq!(rx.recv().unwrap().unwrap(), 3);
    }

    #[test]
    fn requires_a_runtime() {
        let err = DeferredQuery::spawn(seeded(), ReadPredicate::any()).unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }
}
