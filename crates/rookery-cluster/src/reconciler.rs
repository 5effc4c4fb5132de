//! Single-writer reconciliation engine
//!
//! One dedicated worker task owns all state mutation. Externally submitted
//! actions and internal housekeeping both flow through the same FIFO queue
//! model: a side effect against the substrate runs first, and only on
//! success is the pure state transition applied and committed. Readers
//! observe committed states through an atomically swapped `Arc` and a
//! broadcast stream of updates; they never contend with the worker.
//!
//! Two cadences drive the worker: the quick cycle drains submitted actions,
//! the long cycle additionally runs the housekeeping provider.

use crate::error::{ConnectorError, Result};
use crate::event::ClusterChangeEvent;
use crate::observability::ReconcilerMetrics;
use crate::state::{ClusterState, Transitioned};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Committed updates kept for slow subscribers before they start lagging
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// A pure state transition, applied only after its side effect succeeded
pub type Transition = Box<dyn FnOnce(&ClusterState) -> Result<Transitioned> + Send>;

/// The in-flight side effect of an action, resolving to its transition
pub type ActionFuture = BoxFuture<'static, Result<Transition>>;

/// A deferred action: given the state at execution time, produce the side
/// effect to run
pub type ActionProducer = Box<dyn FnOnce(&ClusterState) -> ActionFuture + Send>;

/// Build an action with no substrate side effect, only a state transition.
///
/// Used for events arriving on the watch streams.
pub fn transition_only<F>(transition: F) -> ActionProducer
where
    F: FnOnce(&ClusterState) -> Result<Transitioned> + Send + 'static,
{
    Box::new(move |_state: &ClusterState| -> ActionFuture {
        Box::pin(futures::future::ready(Ok(
            Box::new(transition) as Transition
        )))
    })
}

/// One committed reconciler step
#[derive(Debug, Clone)]
pub struct ClusterUpdate {
    /// The state after the transition
    pub snapshot: ClusterState,
    /// What the transition changed; empty for the synthetic first emission
    pub delta_events: Vec<ClusterChangeEvent>,
}

/// A housekeeping action planned by the provider
pub struct ReconcileAction {
    /// Stable label for logs and metrics
    pub label: &'static str,
    /// The deferred action
    pub producer: ActionProducer,
}

impl ReconcileAction {
    pub fn new(label: &'static str, producer: ActionProducer) -> Self {
        Self { label, producer }
    }
}

/// Plans the internal actions needed to converge current state towards the
/// desired state. Consulted once per long cycle.
pub trait ReconcilerActionsProvider: Send + Sync + 'static {
    fn plan(&mut self, state: &ClusterState) -> Vec<ReconcileAction>;
}

enum Reply {
    /// An external caller awaits the result
    Caller(oneshot::Sender<Result<Arc<ClusterState>>>),
    /// Fire-and-forget submission; the worker logs the outcome
    Background(&'static str),
}

impl Reply {
    /// Whether the caller gave up before the side effect started
    fn abandoned(&self) -> bool {
        match self {
            Reply::Caller(tx) => tx.is_closed(),
            Reply::Background(_) => false,
        }
    }

    fn complete(self, result: Result<Arc<ClusterState>>) {
        match self {
            Reply::Caller(tx) => {
                // Receiver may have been dropped after the effect started
                let _ = tx.send(result);
            }
            Reply::Background(label) => match result {
                Ok(_) => debug!(action = label, "Processed background action"),
                Err(e) => warn!(action = label, error = %e, "Background action failed"),
            },
        }
    }
}

struct QueuedAction {
    producer: ActionProducer,
    reply: Reply,
}

/// Handle to the reconciliation engine
pub struct Reconciler {
    state: Arc<RwLock<Arc<ClusterState>>>,
    action_tx: mpsc::UnboundedSender<QueuedAction>,
    updates_tx: RwLock<Option<broadcast::Sender<ClusterUpdate>>>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Reconciler {
    /// Spawn the worker task and return the handle
    pub fn spawn(
        initial: ClusterState,
        provider: Box<dyn ReconcilerActionsProvider>,
        quick_cycle: Duration,
        long_cycle: Duration,
    ) -> Self {
        let state = Arc::new(RwLock::new(Arc::new(initial)));
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            state: state.clone(),
            action_rx,
            updates_tx: updates_tx.clone(),
            provider,
            quick_cycle,
            long_cycle,
            shutdown_rx,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            state,
            action_tx,
            updates_tx: RwLock::new(Some(updates_tx)),
            shutdown_tx,
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        }
    }

    /// The latest committed state. Safe from any thread; never blocks the
    /// worker.
    pub fn current(&self) -> Arc<ClusterState> {
        self.state.read().clone()
    }

    /// Submit an action and await the state committed by it.
    ///
    /// Dropping the returned future before the side effect starts removes
    /// the action from the queue; afterwards the action runs to completion
    /// and its result is discarded.
    pub async fn apply(&self, producer: ActionProducer) -> Result<Arc<ClusterState>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::ShuttingDown);
        }
        let (tx, rx) = oneshot::channel();
        self.action_tx
            .send(QueuedAction {
                producer,
                reply: Reply::Caller(tx),
            })
            .map_err(|_| ConnectorError::ShuttingDown)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::ShuttingDown),
        }
    }

    /// Submit an action without awaiting it; the worker logs the outcome.
    ///
    /// The enqueue happens before this returns, so successive submissions
    /// from one task keep their order.
    pub fn submit_background(&self, label: &'static str, producer: ActionProducer) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.action_tx.send(QueuedAction {
            producer,
            reply: Reply::Background(label),
        });
    }

    /// Stream of committed updates.
    ///
    /// The first emission is a synthetic snapshot of the current state with
    /// no delta events; every subsequent emission corresponds to exactly one
    /// committed transition, in commit order. The stream completes on
    /// shutdown.
    pub fn changes(&self) -> BoxStream<'static, ClusterUpdate> {
        let receiver = self.updates_tx.read().as_ref().map(|tx| tx.subscribe());
        let first = ClusterUpdate {
            snapshot: self.current().as_ref().clone(),
            delta_events: Vec::new(),
        };
        let head = futures::stream::once(futures::future::ready(first));
        match receiver {
            Some(rx) => {
                let tail = BroadcastStream::new(rx)
                    .filter_map(|item| futures::future::ready(item.ok()));
                head.chain(tail).boxed()
            }
            None => head.boxed(),
        }
    }

    /// Whether shutdown has begun
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the worker, draining queued work within `grace`. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("Reconciler worker did not drain within the grace period; aborting");
                handle.abort();
            }
        }
        // Completes all `changes()` subscriber streams
        *self.updates_tx.write() = None;
    }
}

struct Worker {
    state: Arc<RwLock<Arc<ClusterState>>>,
    action_rx: mpsc::UnboundedReceiver<QueuedAction>,
    updates_tx: broadcast::Sender<ClusterUpdate>,
    provider: Box<dyn ReconcilerActionsProvider>,
    quick_cycle: Duration,
    long_cycle: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut quick = tokio::time::interval(self.quick_cycle);
        quick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut long = tokio::time::interval(self.long_cycle);
        long.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break,
                _ = long.tick() => {
                    self.drain_submitted().await;
                    self.run_housekeeping().await;
                }
                _ = quick.tick() => {
                    self.drain_submitted().await;
                }
            }
        }

        // Complete work that was queued before shutdown began
        self.drain_submitted().await;
        self.action_rx.close();
        while let Ok(action) = self.action_rx.try_recv() {
            action.reply.complete(Err(ConnectorError::ShuttingDown));
        }
        debug!("Reconciler worker stopped");
    }

    async fn drain_submitted(&mut self) {
        while let Ok(action) = self.action_rx.try_recv() {
            if action.reply.abandoned() {
                debug!("Dropping cancelled action before its side effect");
                continue;
            }
            let result = self.execute(action.producer).await;
            action.reply.complete(result);
        }
    }

    async fn run_housekeeping(&mut self) {
        let current = self.state.read().clone();
        for action in self.provider.plan(current.as_ref()) {
            match self.execute(action.producer).await {
                Ok(_) => debug!(action = action.label, "Reconciliation action applied"),
                Err(e) => warn!(
                    action = action.label,
                    error = %e,
                    "Reconciliation action failed; retrying on the next long cycle"
                ),
            }
        }
    }

    /// Run one action: side effect first, then the transition, then commit.
    ///
    /// The side-effect await is the worker's only suspension point outside
    /// its periodic sleep.
    async fn execute(&mut self, producer: ActionProducer) -> Result<Arc<ClusterState>> {
        let started = Instant::now();
        let current = self.state.read().clone();
        let result = async {
            let transition = producer(current.as_ref()).await?;
            let (next, events) = transition(current.as_ref())?;
            Ok(self.commit(next, events))
        }
        .await;
        ReconcilerMetrics::record_action(started.elapsed(), result.is_ok());
        result
    }

    fn commit(&self, next: ClusterState, events: Vec<ClusterChangeEvent>) -> Arc<ClusterState> {
        ReconcilerMetrics::set_sibling_count(next.siblings().len());
        let next = Arc::new(next);
        *self.state.write() = next.clone();
        let _ = self.updates_tx.send(ClusterUpdate {
            snapshot: next.as_ref().clone(),
            delta_events: events,
        });
        next
    }
}
