//! The watch registry: predicate subscriptions notified after each commit.
//!
//! Handlers are held by `Weak` reference. A subscription whose handler has
//! been dropped is skipped and pruned at the next dispatch, whatever its
//! predicate. Each handler call is isolated: an `Err` or a panic is logged and
//! delivery continues with the next subscriber.
//!
//! Every subscription carries a gate held for the length of each handler call.
//! Cancelling closes the subscription and then passes through the gate, so
//! once `cancel` returns no call to that handler is running or will start.
//! A cancel issued from inside a handler skips the wait, since the calling
//! thread may itself hold the gate it would wait on.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::sync::{mpsc, oneshot};

use graph_core::{ChangeRecord, DispatchMode, GraphError, Result};

use crate::predicate::WatchPredicate;

/// Receives matching change records.
pub trait WatchHandler: Send + Sync {
    fn on_change(&self, change: &ChangeRecord) -> anyhow::Result<()>;
}

impl<F> WatchHandler for F
where
    F: Fn(&ChangeRecord) -> anyhow::Result<()> + Send + Sync,
{
    fn on_change(&self, change: &ChangeRecord) -> anyhow::Result<()> {
        self(change)
    }
}

/// Opaque subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

thread_local! {
    /// Gates of the subscriptions whose handlers this thread is running.
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct Liveness {
    live: AtomicBool,
    gate: Mutex<()>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            gate: Mutex::new(()),
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    /// Close the subscription and wait out any in-flight handler call.
    fn retire(&self) {
        self.live.store(false, Ordering::SeqCst);
        let inside_handler = DELIVERING.with(|d| !d.borrow().is_empty());
        if !inside_handler {
            drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }
}

struct Entry {
    predicate: WatchPredicate,
    handler: Weak<dyn WatchHandler>,
    liveness: Arc<Liveness>,
}

#[derive(Default)]
struct Subscribers {
    entries: RwLock<BTreeMap<SubscriptionId, Arc<Entry>>>,
    next_id: AtomicU64,
}

impl Subscribers {
    /// Unregister `id`. The caller decides whether to wait on the gate.
    fn take(&self, id: SubscriptionId) -> Option<Arc<Entry>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    fn cancel(&self, id: SubscriptionId) -> bool {
        match self.take(id) {
            Some(entry) => {
                entry.liveness.retire();
                true
            }
            None => false,
        }
    }

    fn live_handlers(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.handler.strong_count() > 0)
            .count()
    }

    /// Deliver a batch in commit order, then subscription order.
    fn deliver(&self, changes: &[ChangeRecord]) {
        let snapshot: Vec<(SubscriptionId, Arc<Entry>)> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.iter().map(|(id, e)| (*id, e.clone())).collect()
        };

        let mut released = Vec::new();
        for change in changes {
            for (id, entry) in &snapshot {
                let Some(handler) = entry.handler.upgrade() else {
                    if !released.contains(id) {
                        released.push(*id);
                    }
                    continue;
                };
                if !entry.liveness.is_live() || !entry.predicate.matches(change) {
                    continue;
                }

                // A nested dispatch from inside this same handler already holds the gate.
                let key = entry.liveness.key();
                let nested = DELIVERING.with(|d| d.borrow().contains(&key));
                let _gate = (!nested).then(|| {
                    entry
                        .liveness
                        .gate
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                });
                if !entry.liveness.is_live() {
                    continue;
                }

                DELIVERING.with(|d| d.borrow_mut().push(key));
                let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_change(change)));
                DELIVERING.with(|d| d.borrow_mut().pop());

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        subscription = %id,
                        element_id = %change.element_id(),
                        error = %e,
                        "Watch handler failed"
                    ),
                    Err(_) => tracing::warn!(
                        subscription = %id,
                        element_id = %change.element_id(),
                        "Watch handler panicked"
                    ),
                }
            }
        }

        for id in released {
            if let Some(entry) = self.take(id) {
                entry.liveness.live.store(false, Ordering::SeqCst);
                tracing::debug!(subscription = %id, "Pruned subscription with released handler");
            }
        }
    }
}

/// Handle returned by [`WatchRegistry::subscribe`].
///
/// Dropping the handle does not cancel the subscription; drop the handler or
/// call [`Subscription::cancel`].
pub struct Subscription {
    id: SubscriptionId,
    liveness: Arc<Liveness>,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.liveness.is_live()
    }

    /// Cancel the subscription. Idempotent.
    ///
    /// Blocks until an in-flight call of the handler on another thread returns.
    pub fn cancel(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.take(self.id);
        }
        self.liveness.retire();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

enum DispatchMessage {
    Batch(Vec<ChangeRecord>),
    Flush(oneshot::Sender<()>),
}

enum Dispatcher {
    Inline,
    Background(mpsc::UnboundedSender<DispatchMessage>),
}

/// Thread-safe registry of commit watchers.
pub struct WatchRegistry {
    subscribers: Arc<Subscribers>,
    dispatcher: Dispatcher,
}

impl WatchRegistry {
    /// A registry that runs handlers on the committing thread.
    pub fn inline() -> Self {
        Self {
            subscribers: Arc::new(Subscribers::default()),
            dispatcher: Dispatcher::Inline,
        }
    }

    /// A registry that runs handlers on a background tokio task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn background() -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            GraphError::Config("background watch dispatch requires a tokio runtime".to_string())
        })?;

        let subscribers = Arc::new(Subscribers::default());
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_dispatch_loop(subscribers.clone(), rx));

        Ok(Self {
            subscribers,
            dispatcher: Dispatcher::Background(tx),
        })
    }

    pub fn new(mode: DispatchMode) -> Result<Self> {
        match mode {
            DispatchMode::Inline => Ok(Self::inline()),
            DispatchMode::Background => Self::background(),
        }
    }

    pub fn mode(&self) -> DispatchMode {
        match self.dispatcher {
            Dispatcher::Inline => DispatchMode::Inline,
            Dispatcher::Background(_) => DispatchMode::Background,
        }
    }

    /// Register `handler` for changes matching `predicate`.
    ///
    /// The registry keeps only a weak reference; the caller owns the handler.
    pub fn subscribe<H>(&self, predicate: WatchPredicate, handler: &Arc<H>) -> Subscription
    where
        H: WatchHandler + 'static,
    {
        let id = SubscriptionId(self.subscribers.next_id.fetch_add(1, Ordering::SeqCst));
        let liveness = Arc::new(Liveness::new());
        let strong: Arc<dyn WatchHandler> = handler.clone();
        let entry = Entry {
            predicate,
            handler: Arc::downgrade(&strong),
            liveness: liveness.clone(),
        };

        self.subscribers
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(entry));
        tracing::debug!(subscription = %id, "Watch subscription added");

        Subscription {
            id,
            liveness,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Remove a subscription. Cancelling an unknown or already-cancelled id is a no-op.
    ///
    /// Same guarantee as [`Subscription::cancel`]: the handler is not running
    /// once this returns.
    pub fn cancel(&self, id: SubscriptionId) {
        if self.subscribers.cancel(id) {
            tracing::debug!(subscription = %id, "Watch subscription cancelled");
        }
    }

    /// Number of subscriptions whose handler is still alive.
    pub fn len(&self) -> usize {
        self.subscribers.live_handlers()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand a commit's change records to matching subscribers.
    pub fn dispatch(&self, changes: Vec<ChangeRecord>) {
        if changes.is_empty() {
            return;
        }
        match &self.dispatcher {
            Dispatcher::Inline => self.subscribers.deliver(&changes),
            Dispatcher::Background(tx) => {
                if tx.send(DispatchMessage::Batch(changes)).is_err() {
                    tracing::warn!("Watch dispatch task is gone; change batch dropped");
                }
            }
        }
    }

    /// Resolve once every batch dispatched before this call has been delivered.
    pub async fn flush(&self) {
        if let Dispatcher::Background(tx) = &self.dispatcher {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(DispatchMessage::Flush(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("mode", &self.mode())
            .field("subscriptions", &self.len())
            .finish()
    }
}

/// Background delivery loop. Batches are delivered one at a time on the
/// blocking pool so handlers never stall async workers and commit order holds.
async fn run_dispatch_loop(
    subscribers: Arc<Subscribers>,
    mut rx: mpsc::UnboundedReceiver<DispatchMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            DispatchMessage::Batch(changes) => {
                let subscribers = subscribers.clone();
                let delivered =
                    tokio::task::spawn_blocking(move || subscribers.deliver(&changes)).await;
                if let Err(e) = delivered {
                    tracing::error!(error = %e, "Watch dispatch task failed");
                }
            }
            DispatchMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Watch dispatch loop stopped");
}
