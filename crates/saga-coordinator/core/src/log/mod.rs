//! # Coordinator Log
//!
//! Bounded, asynchronous write path for transaction records.
//!
//! Callers [`submit`](CoordinatorLog::submit) [`CoordinatorAction`]s and move
//! on; a fixed pool of lane workers applies them to the
//! [`TransactionRepository`] in the background.
//!
//! ```text
//!  submit(action) ──► Semaphore (queue_capacity permits)
//!                          │
//!              hash(trans_id) % lanes
//!          ┌───────────────┼───────────────┐
//!          ▼               ▼               ▼
//!      lane 0 mpsc     lane 1 mpsc     lane N mpsc
//!          │               │               │
//!      worker 0        worker 1        worker N   ──► repository
//! ```
//!
//! Every action for a given transaction id lands on the same lane and is
//! applied in submission order. Different ids proceed in parallel.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::model::{ActionKind, CoordinatorAction, TransId, TransactionRecord, TransactionStatus};
use crate::port::TransactionRepository;

/// Item travelling down a lane.
enum LaneItem {
    /// An action together with its capacity permit.
    Action {
        action: CoordinatorAction,
        permit: OwnedSemaphorePermit,
    },
    /// Resolved once every item queued before it on the lane has been applied.
    Barrier(oneshot::Sender<()>),
}

/// Counters for the coordinator log.
#[derive(Debug, Default)]
pub struct CoordinatorLogMetrics {
    /// Actions accepted by `submit`.
    pub submitted: AtomicU64,
    /// Actions the repository accepted.
    pub applied: AtomicU64,
    /// Actions dropped because the repository failed.
    pub dropped: AtomicU64,
    /// Actions accepted but not yet applied or dropped.
    pub in_flight: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorLogMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorLogMetricsSnapshot {
    pub submitted: u64,
    pub applied: u64,
    pub dropped: u64,
    pub in_flight: u64,
}

impl CoordinatorLogMetrics {
    pub fn snapshot(&self) -> CoordinatorLogMetricsSnapshot {
        CoordinatorLogMetricsSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            applied: self.applied.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Bounded queue plus worker pool serializing repository mutations.
pub struct CoordinatorLog<R: TransactionRepository> {
    repository: Arc<R>,
    lanes: RwLock<Vec<mpsc::UnboundedSender<LaneItem>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    metrics: Arc<CoordinatorLogMetrics>,
    idle: Arc<Notify>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: TransactionRepository> std::fmt::Debug for CoordinatorLog<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorLog")
            .field("lanes", &self.lanes.read().len())
            .field("capacity", &self.capacity)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl<R: TransactionRepository> CoordinatorLog<R> {
    /// Start the lane workers. Must be called from within a tokio runtime.
    pub fn start(repository: Arc<R>, config: &CoordinatorConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(CoordinatorLogMetrics::default());
        let idle = Arc::new(Notify::new());
        let mut lanes = Vec::with_capacity(config.worker_threads);
        let mut workers = Vec::with_capacity(config.worker_threads);

        for lane in 0..config.worker_threads {
            let (sender, receiver) = mpsc::unbounded_channel();
            lanes.push(sender);
            workers.push(tokio::spawn(run_lane(
                lane,
                Arc::clone(&repository),
                receiver,
                Arc::clone(&metrics),
                Arc::clone(&idle),
            )));
        }

        info!(
            workers = config.worker_threads,
            capacity = config.queue_capacity,
            "Coordinator log started"
        );

        Ok(Arc::new(Self {
            repository,
            lanes: RwLock::new(lanes),
            permits: Arc::new(Semaphore::new(config.queue_capacity)),
            capacity: config.queue_capacity,
            metrics,
            idle,
            workers: Mutex::new(workers),
        }))
    }

    /// Enqueue an action for asynchronous application.
    ///
    /// Waits while the log is at capacity. Fails only with
    /// [`CoordinatorError::Cancelled`] once the log has been shut down.
    pub async fn submit(&self, action: CoordinatorAction) -> Result<()> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CoordinatorError::Cancelled)?;

        let trans_id = action.trans_id().clone();
        let kind = action.kind;

        self.metrics.in_flight.fetch_add(1, Ordering::SeqCst);
        let sent = {
            let lanes = self.lanes.read();
            if lanes.is_empty() {
                false
            } else {
                let lane = lane_for(&trans_id, lanes.len());
                lanes[lane].send(LaneItem::Action { action, permit }).is_ok()
            }
        };

        if !sent {
            self.finish_one();
            warn!(trans_id = %trans_id, kind = %kind, "Coordinator log closed, action rejected");
            return Err(CoordinatorError::Cancelled);
        }

        self.metrics.submitted.fetch_add(1, Ordering::SeqCst);
        debug!(trans_id = %trans_id, kind = %kind, "Coordinator action queued");
        Ok(())
    }

    /// Wait until every action already submitted for `trans_id` has been
    /// applied or dropped.
    pub async fn flush(&self, trans_id: &TransId) -> Result<()> {
        let (done, applied) = oneshot::channel();
        let sent = {
            let lanes = self.lanes.read();
            !lanes.is_empty()
                && lanes[lane_for(trans_id, lanes.len())]
                    .send(LaneItem::Barrier(done))
                    .is_ok()
        };
        if !sent {
            return Err(CoordinatorError::Cancelled);
        }
        applied.await.map_err(|_| CoordinatorError::Cancelled)
    }

    /// Queue deletion of a record.
    pub async fn remove(&self, record: TransactionRecord) -> Result<()> {
        self.submit(CoordinatorAction::delete(record)).await
    }

    /// Read a record directly from the repository.
    pub async fn find_by_trans_id(&self, trans_id: &TransId) -> Result<Option<TransactionRecord>> {
        self.repository
            .find_by_trans_id(trans_id)
            .await
            .map_err(CoordinatorError::persistence)
    }

    /// Update a record's status directly, bypassing the queue.
    pub async fn update_status(&self, trans_id: &TransId, status: TransactionStatus) -> Result<usize> {
        self.repository
            .update_status(trans_id, status)
            .await
            .map_err(CoordinatorError::persistence)
    }

    /// Update only the participant list directly, bypassing the queue.
    pub async fn update_participants(&self, record: &TransactionRecord) -> Result<usize> {
        self.repository
            .update_participants(record)
            .await
            .map_err(CoordinatorError::persistence)
    }

    /// Begin records created before `cutoff`.
    pub async fn list_stale_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TransactionRecord>> {
        self.repository
            .list_stale_before(cutoff)
            .await
            .map_err(CoordinatorError::persistence)
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free for new submissions.
    pub fn available_capacity(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn metrics(&self) -> CoordinatorLogMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve once every accepted action has been applied or dropped.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.metrics.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting actions, drain the lanes and join the workers.
    ///
    /// Submitters blocked on capacity are released with
    /// [`CoordinatorError::Cancelled`].
    pub async fn shutdown(&self) {
        self.permits.close();
        self.lanes.write().clear();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Coordinator lane worker panicked: {}", e);
            }
        }
        info!(metrics = ?self.metrics.snapshot(), "Coordinator log stopped");
    }

    fn finish_one(&self) {
        release_in_flight(&self.metrics, &self.idle);
    }
}

fn lane_for(trans_id: &TransId, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    trans_id.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

fn release_in_flight(metrics: &CoordinatorLogMetrics, idle: &Notify) {
    if metrics.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        idle.notify_waiters();
    }
}

async fn run_lane<R: TransactionRepository>(
    lane: usize,
    repository: Arc<R>,
    mut receiver: mpsc::UnboundedReceiver<LaneItem>,
    metrics: Arc<CoordinatorLogMetrics>,
    idle: Arc<Notify>,
) {
    while let Some(item) = receiver.recv().await {
        match item {
            LaneItem::Action { action, permit } => {
                // Capacity frees up as soon as the action leaves the queue.
                drop(permit);
                apply(repository.as_ref(), &action, &metrics).await;
                release_in_flight(&metrics, &idle);
            }
            LaneItem::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(lane, "Coordinator lane stopped");
}

async fn apply<R: TransactionRepository>(
    repository: &R,
    action: &CoordinatorAction,
    metrics: &CoordinatorLogMetrics,
) {
    let record = &action.record;
    let result = match action.kind {
        ActionKind::Save => repository.create(record).await,
        ActionKind::Update => repository.update(record).await,
        ActionKind::UpdateParticipants => repository.update_participants(record).await,
        ActionKind::Delete => repository.remove(&record.trans_id).await,
    };

    match result {
        Ok(0) => {
            metrics.applied.fetch_add(1, Ordering::SeqCst);
            warn!(
                trans_id = %record.trans_id,
                kind = %action.kind,
                "Coordinator action affected no rows"
            );
        }
        Ok(_) => {
            metrics.applied.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            metrics.dropped.fetch_add(1, Ordering::SeqCst);
            error!(
                trans_id = %record.trans_id,
                kind = %action.kind,
                "Failed to apply coordinator action, dropping it: {}",
                e
            );
        }
    }
}
