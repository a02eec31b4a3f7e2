//! Firehose supervisor - runs the watcher, the sink and the cursor
//! publisher as one unit.
//!
//! ```text
//! start() ─┬─► sink workers
//!          ├─► ChangeWatcher::watch ──cursor──► publisher ──► take_updates()
//!          └─► wait for stop
//!
//! stop()  ──► latch ──► watcher + publisher exit ──► sink drains and stops
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::AllocationsApi;
use crate::restore::{RestoreError, RestoreValue};
use crate::shutdown::{wait_for_shutdown, ShutdownLatch};
use crate::sink::{Sink, SinkError};
use crate::watcher::{ChangeWatcher, WatcherConfig};

/// Default interval between cursor publications.
pub const CURSOR_PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

/// Buffered cursor updates before periodic publications are skipped.
const UPDATE_CHANNEL_CAPACITY: usize = 8;

/// How long the final cursor update waits for room in the channel.
const FINAL_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from running the firehose.
#[derive(Debug, Error)]
pub enum FirehoseError {
    #[error("firehose already started")]
    AlreadyStarted,

    #[error("sink failed to start: {0}")]
    Sink(#[from] SinkError),
}

/// Supervises one allocation firehose.
pub struct Firehose<A: AllocationsApi + ?Sized> {
    api: Arc<A>,
    sink: Arc<dyn Sink>,
    watcher_config: WatcherConfig,
    publish_interval: Duration,

    /// Cursor the watcher starts from.
    cursor: u64,

    shutdown: ShutdownLatch,
    started: AtomicBool,

    /// Flips to true once `start` has joined its tasks.
    tasks_done: watch::Sender<bool>,

    /// Flips to true once `stop` has stopped the sink.
    stopped: watch::Sender<bool>,

    updates_tx: mpsc::Sender<u64>,
    updates_rx: Mutex<Option<mpsc::Receiver<u64>>>,

    /// Set once `take_updates` hands out the receiver.
    updates_taken: Arc<AtomicBool>,
}

impl<A: AllocationsApi + ?Sized> Firehose<A> {
    /// Create a firehose reading from `api` and delivering into `sink`.
    pub fn new(api: Arc<A>, sink: Arc<dyn Sink>) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (tasks_done, _) = watch::channel(false);
        let (stopped, _) = watch::channel(false);

        Self {
            api,
            sink,
            watcher_config: WatcherConfig::default(),
            publish_interval: CURSOR_PUBLISH_INTERVAL,
            cursor: 0,
            shutdown: ShutdownLatch::new(),
            started: AtomicBool::new(false),
            tasks_done,
            stopped,
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
            updates_taken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the watcher configuration.
    pub fn with_watcher_config(mut self, config: WatcherConfig) -> Self {
        self.watcher_config = config;
        self
    }

    /// Override the cursor publication interval.
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Logical component name, e.g. `allocations-http`.
    pub fn name(&self) -> String {
        format!("allocations-{}", self.sink.name())
    }

    /// Cursor the watcher will start from.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Seed the cursor from a persisted restore value.
    ///
    /// On error the cursor is left unchanged.
    pub fn set_restore_value(&mut self, value: RestoreValue) -> Result<(), RestoreError> {
        let cursor = value.cursor()?;
        info!(firehose = %self.name(), cursor, "Restoring cursor");
        self.cursor = cursor;
        Ok(())
    }

    /// Take the stream of cursor values to persist.
    ///
    /// A value is sent every publish interval and once more on shutdown.
    /// Nothing is sent until this has been called. Returns `None` after the
    /// first call.
    pub async fn take_updates(&self) -> Option<mpsc::Receiver<u64>> {
        let updates = self.updates_rx.lock().await.take();
        if updates.is_some() {
            self.updates_taken.store(true, Ordering::SeqCst);
        }
        updates
    }

    /// Run the firehose until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> Result<(), FirehoseError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FirehoseError::AlreadyStarted);
        }

        let result = self.run().await;
        self.tasks_done.send_replace(true);
        result
    }

    async fn run(&self) -> Result<(), FirehoseError> {
        self.sink.start().await?;

        info!(
            firehose = %self.name(),
            cursor = self.cursor,
            "Starting firehose"
        );

        let (cursor_tx, cursor_rx) = watch::channel(self.cursor);

        let watcher = ChangeWatcher::new(
            Arc::clone(&self.api),
            Arc::clone(&self.sink),
            self.watcher_config,
            cursor_tx,
        );
        let watcher_handle = tokio::spawn(watcher.watch(self.shutdown.subscribe()));

        let publisher_handle = tokio::spawn(publish_cursor(
            cursor_rx,
            self.updates_tx.clone(),
            Arc::clone(&self.updates_taken),
            self.publish_interval,
            self.shutdown.subscribe(),
        ));

        wait_for_shutdown(&mut self.shutdown.subscribe()).await;

        match watcher_handle.await {
            Ok(cursor) => debug!(cursor, "Watcher task exited"),
            Err(e) => error!(error = %e, "Watcher task panicked"),
        }
        if let Err(e) = publisher_handle.await {
            error!(error = %e, "Cursor publisher task panicked");
        }

        info!(firehose = %self.name(), "Firehose tasks stopped");
        Ok(())
    }

    /// Stop the firehose and drain the sink.
    ///
    /// Safe to call more than once and from several tasks; every call
    /// returns once the sink has stopped.
    pub async fn stop(&self) {
        if !self.shutdown.trigger() {
            debug!(firehose = %self.name(), "Stop already in progress");
            let mut stopped = self.stopped.subscribe();
            let _ = stopped.wait_for(|done| *done).await;
            return;
        }

        info!(firehose = %self.name(), "Stopping firehose");

        if self.started.load(Ordering::SeqCst) {
            let mut tasks_done = self.tasks_done.subscribe();
            let _ = tasks_done.wait_for(|done| *done).await;
        }

        self.sink.stop().await;
        self.stopped.send_replace(true);

        info!(firehose = %self.name(), "Firehose stopped");
    }
}

/// Send the current cursor every `period`, and once more after the watcher
/// has exited on shutdown. Sends are skipped while nobody has taken the
/// receiving end.
async fn publish_cursor(
    mut cursor_rx: watch::Receiver<u64>,
    updates: mpsc::Sender<u64>,
    taken: Arc<AtomicBool>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !taken.load(Ordering::SeqCst) {
                    continue;
                }
                let cursor = *cursor_rx.borrow();
                if updates.try_send(cursor).is_err() {
                    debug!(cursor, "Cursor update not consumed, skipping");
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }

    // The watcher drops its sender on exit; wait for its last value.
    while cursor_rx.changed().await.is_ok() {}

    let cursor = *cursor_rx.borrow();
    if !taken.load(Ordering::SeqCst) {
        debug!(cursor, "No cursor consumer, skipping final update");
        return;
    }
    match updates.send_timeout(cursor, FINAL_UPDATE_TIMEOUT).await {
        Ok(()) => debug!(cursor, "Published final cursor"),
        Err(e) => warn!(cursor, error = %e, "Final cursor update not delivered"),
    }
}
