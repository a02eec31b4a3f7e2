//! Change watcher - turns the blocking allocation list into a stream of
//! allocations modified since the last cursor.
//!
//! Each iteration:
//! 1. Lists allocations with `wait_index = cursor`
//! 2. On error, waits `retry_backoff` and retries the same query, forever
//! 3. If the reported index equals the wait index, nothing changed
//! 4. Otherwise puts every allocation with `ModifyIndex > cursor` into the
//!    sink, in list order, then advances the cursor to the reported index
//!
//! The cursor only moves after every put for the response has returned, so a
//! crash can re-deliver the last window but never skips it. Allocations that
//! a stale read leaves out of a listing are skipped for good once the cursor
//! has moved past their index.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use firehose_events::Allocation;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{AllocationsApi, ListQuery, ListResponse};
use crate::shutdown::wait_for_shutdown;
use crate::sink::Sink;

/// Default server-side wait for the blocking query.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(5 * 60);

/// Default delay before retrying a failed list call.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Watcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Server-side wait for each blocking query.
    pub wait_time: Duration,

    /// Delay between a failed list call and its retry.
    pub retry_backoff: Duration,

    /// Allow stale reads from followers.
    pub allow_stale: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            wait_time: DEFAULT_WAIT_TIME,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            allow_stale: true,
        }
    }
}

/// Allocations modified after `cursor`, in list order.
pub fn modified_since(items: &[Allocation], cursor: u64) -> impl Iterator<Item = &Allocation> {
    items.iter().filter(move |allocation| allocation.modify_index > cursor)
}

/// Cursor after observing a response that reported `last_index`.
///
/// A reported index below the cursor (a stale follower answering after a
/// fresher one) leaves the cursor where it is.
pub fn advance(cursor: u64, last_index: u64) -> u64 {
    cursor.max(last_index)
}

/// Watches the allocation list and feeds new allocations into a sink.
pub struct ChangeWatcher<A: AllocationsApi + ?Sized> {
    api: Arc<A>,
    sink: Arc<dyn Sink>,
    config: WatcherConfig,

    /// Owned here; every change is published on `cursor_tx`.
    cursor: u64,
    cursor_tx: watch::Sender<u64>,
}

impl<A: AllocationsApi + ?Sized> ChangeWatcher<A> {
    /// Create a watcher starting from the value currently held by `cursor_tx`.
    pub fn new(
        api: Arc<A>,
        sink: Arc<dyn Sink>,
        config: WatcherConfig,
        cursor_tx: watch::Sender<u64>,
    ) -> Self {
        let cursor = *cursor_tx.borrow();
        Self {
            api,
            sink,
            config,
            cursor,
            cursor_tx,
        }
    }

    /// Current cursor.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// The query for the next iteration.
    pub fn query(&self) -> ListQuery {
        ListQuery {
            wait_index: self.cursor,
            wait_time: self.config.wait_time,
            allow_stale: self.config.allow_stale,
        }
    }

    /// Run until shutdown. Returns the final cursor.
    ///
    /// Shutdown interrupts a pending list call or retry delay immediately.
    /// A response that has already arrived is processed to completion first.
    pub async fn watch(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            cursor = self.cursor,
            wait_secs = self.config.wait_time.as_secs(),
            "Starting allocation watcher"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let query = self.query();
            let result = tokio::select! {
                result = self.api.list(&query) => result,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match result {
                Ok(response) => {
                    self.process(query.wait_index, response).await;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_secs = self.config.retry_backoff.as_secs(),
                        "Unable to fetch allocations"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            }
        }

        info!(cursor = self.cursor, "Allocation watcher stopped");
        self.cursor
    }

    /// Handle one list response. Returns the number of allocations put.
    pub async fn process(&mut self, wait_index: u64, response: ListResponse) -> usize {
        let ListResponse { items, last_index } = response;

        if last_index == wait_index {
            debug!(
                last_index,
                wait_index, "Allocations index is unchanged"
            );
            return 0;
        }

        if last_index < self.cursor {
            warn!(
                last_index,
                cursor = self.cursor,
                "Allocations index went backwards, ignoring response"
            );
            return 0;
        }

        debug!(last_index, wait_index, "Allocations index is changed");

        let mut published = 0;
        for allocation in modified_since(&items, self.cursor) {
            if self.publish(allocation).await {
                published += 1;
            }
        }

        self.cursor = advance(self.cursor, last_index);
        self.cursor_tx.send_replace(self.cursor);

        debug!(
            cursor = self.cursor,
            published,
            listed = items.len(),
            "Advanced cursor"
        );
        published
    }

    async fn publish(&self, allocation: &Allocation) -> bool {
        let payload = match allocation.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    allocation_id = allocation.id().unwrap_or_default(),
                    modify_index = allocation.modify_index,
                    error = %e,
                    "Failed to serialize allocation, dropping"
                );
                return false;
            }
        };

        match self.sink.put(Bytes::from(payload)).await {
            Ok(()) => {
                debug!(
                    allocation_id = allocation.id().unwrap_or_default(),
                    job_id = allocation.job_id().unwrap_or_default(),
                    client_status = allocation.client_status().unwrap_or_default(),
                    modify_index = allocation.modify_index,
                    "Published allocation"
                );
                true
            }
            Err(e) => {
                error!(
                    allocation_id = allocation.id().unwrap_or_default(),
                    modify_index = allocation.modify_index,
                    error = %e,
                    "Sink rejected allocation, dropping"
                );
                false
            }
        }
    }
}
