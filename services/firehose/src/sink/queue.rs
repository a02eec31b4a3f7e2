//! Bounded delivery queue drained by a pool of workers.
//!
//! Lifecycle:
//!
//! ```text
//! Created ──start()──► Running ──stop()──► Draining ──► Stopped
//! ```
//!
//! `put` keeps accepting payloads while draining; it only fails once the
//! sink is stopped. `stop` returns after every accepted payload has had
//! exactly one delivery attempt and all workers have exited.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{Sink, SinkError};

/// Default number of payloads the queue holds before `put` blocks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// How often `stop` reports drain progress.
const DRAIN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("destination returned status {0}")]
    Status(u16),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers one payload to a destination.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Static identifier, used as the sink name.
    fn name(&self) -> &'static str;

    /// Attempt to deliver a payload once.
    async fn deliver(&self, payload: &[u8]) -> Result<(), TransportError>;
}

/// Sink lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Accepted payloads that have not finished their delivery attempt.
///
/// `queued` is the subset still sitting in the channel, not yet received by
/// a worker. It is tracked here because the channel's own length is only
/// reachable through the receiver lock, which an idle worker holds.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    queued: AtomicUsize,
    drained: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    fn received(&self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }

    fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once the count reaches zero.
    async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.get() == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// A sink backed by a bounded queue and a fixed-size worker pool.
pub struct QueueSink<T: Transport> {
    transport: Arc<T>,
    worker_count: usize,
    capacity: usize,

    /// Dropped on stop so workers see the queue close once it is empty.
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,

    pending: Arc<Pending>,
    state: Mutex<SinkState>,
    workers: Mutex<JoinSet<()>>,

    /// Flips to true once stop has completed.
    stopped: watch::Sender<bool>,
}

impl<T: Transport> QueueSink<T> {
    /// Create a sink with `worker_count` workers and room for `capacity`
    /// queued payloads. Both are clamped to at least one.
    pub fn new(transport: T, worker_count: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (stopped, _) = watch::channel(false);

        Self {
            transport: Arc::new(transport),
            worker_count: worker_count.max(1),
            capacity,
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(Pending::default()),
            state: Mutex::new(SinkState::Created),
            workers: Mutex::new(JoinSet::new()),
            stopped,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of delivery workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Maximum number of queued payloads.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SinkState {
        *self.state.lock().await
    }

    /// Payloads waiting in the queue, not yet picked up by a worker.
    pub fn queue_len(&self) -> usize {
        self.pending.queued()
    }

    /// Payloads accepted by `put` whose delivery attempt has not finished.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    fn spawn_workers(&self, workers: &mut JoinSet<()>) {
        for id in 0..self.worker_count {
            workers.spawn(run_worker(
                id,
                Arc::clone(&self.transport),
                Arc::clone(&self.rx),
                Arc::clone(&self.pending),
            ));
        }
    }

    async fn wait_drained(&self) {
        let sink = self.transport.name();
        info!(
            sink,
            remaining = self.pending.get(),
            "Ensuring writer queue is empty"
        );

        let mut progress = tokio::time::interval(DRAIN_LOG_INTERVAL);
        progress.tick().await;

        loop {
            tokio::select! {
                _ = self.pending.drained() => break,
                _ = progress.tick() => {
                    info!(
                        sink,
                        remaining = self.pending.get(),
                        "Waiting for queue to drain"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl<T: Transport> Sink for QueueSink<T> {
    fn name(&self) -> &'static str {
        self.transport.name()
    }

    async fn start(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        if *state != SinkState::Created {
            return Err(SinkError::InvalidState(*state));
        }

        self.spawn_workers(&mut *self.workers.lock().await);
        *state = SinkState::Running;

        info!(
            sink = self.transport.name(),
            worker_count = self.worker_count,
            capacity = self.capacity,
            "Sink started"
        );
        Ok(())
    }

    async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            let current = *state;
            match current {
                SinkState::Created => {
                    // Nothing has been delivered yet; run the workers just
                    // long enough to empty the queue.
                    self.spawn_workers(&mut *self.workers.lock().await);
                    *state = SinkState::Draining;
                }
                SinkState::Running => *state = SinkState::Draining,
                SinkState::Draining | SinkState::Stopped => {
                    drop(state);
                    let mut stopped = self.stopped.subscribe();
                    let _ = stopped.wait_for(|done| *done).await;
                    return;
                }
            }
        }

        self.wait_drained().await;

        // Workers exit once the queue is closed and empty.
        self.tx.lock().await.take();

        let mut workers = std::mem::take(&mut *self.workers.lock().await);
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(sink = self.transport.name(), error = %e, "Writer task failed");
            }
        }

        let leftover = self.pending.get();
        if leftover > 0 {
            warn!(
                sink = self.transport.name(),
                leftover, "Payloads still pending after writers exited"
            );
        }

        *self.state.lock().await = SinkState::Stopped;
        self.stopped.send_replace(true);
        info!(sink = self.transport.name(), "Sink stopped");
    }

    async fn put(&self, payload: Bytes) -> Result<(), SinkError> {
        let tx = self
            .tx
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or(SinkError::Stopped)?;

        let permit = tx.reserve().await.map_err(|_| SinkError::Stopped)?;
        self.pending.add();
        permit.send(payload);
        Ok(())
    }
}

async fn run_worker<T: Transport>(
    id: usize,
    transport: Arc<T>,
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    pending: Arc<Pending>,
) {
    let sink = transport.name();
    info!(sink, worker = id, "Starting writer");

    loop {
        let next = rx.lock().await.recv().await;
        let Some(payload) = next else {
            break;
        };
        pending.received();

        match transport.deliver(&payload).await {
            Ok(()) => {
                debug!(
                    sink,
                    worker = id,
                    remaining = pending.get().saturating_sub(1),
                    "Publish ok"
                );
            }
            Err(e) => {
                error!(
                    sink,
                    worker = id,
                    error = %e,
                    bytes = payload.len(),
                    "Delivery failed, dropping payload"
                );
            }
        }

        pending.done();
    }

    info!(sink, worker = id, "Writer stopped");
}
