//! Mock collaborators for testing and development.
//!
//! - [`MockAllocationsApi`]: replays scripted list responses, then behaves
//!   like a blocking query that never sees a change
//! - [`MockTransport`]: records deliveries, optionally gated or failing
//! - [`MockSink`]: records `put` calls directly, without a queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use firehose_events::Allocation;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

use crate::client::{AllocationsApi, ClientError, ListQuery, ListResponse};
use crate::sink::{Sink, SinkError, Transport, TransportError};

/// Resolve once `cond` holds, re-checking every time `notify` fires.
async fn wait_until(notify: &Notify, mut cond: impl FnMut() -> bool) {
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if cond() {
            return;
        }

        notified.await;
    }
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Allocations API
// =============================================================================

/// Scripted orchestrator.
#[derive(Default)]
pub struct MockAllocationsApi {
    script: Mutex<VecDeque<Result<ListResponse, String>>>,
    queries: Mutex<Vec<ListQuery>>,
    called: Notify,
}

impl MockAllocationsApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn push_response(&self, items: Vec<Allocation>, last_index: u64) {
        locked(&self.script).push_back(Ok(ListResponse { items, last_index }));
    }

    /// Queue a failed call.
    pub fn push_error(&self, message: impl Into<String>) {
        locked(&self.script).push_back(Err(message.into()));
    }

    /// Every query received so far, in order.
    pub fn queries(&self) -> Vec<ListQuery> {
        locked(&self.queries).clone()
    }

    /// Wait until at least `count` queries have been received.
    pub async fn wait_for_queries(&self, count: usize) {
        wait_until(&self.called, || locked(&self.queries).len() >= count).await;
    }
}

#[async_trait]
impl AllocationsApi for MockAllocationsApi {
    async fn list(&self, query: &ListQuery) -> Result<ListResponse, ClientError> {
        let next = {
            locked(&self.queries).push(*query);
            locked(&self.script).pop_front()
        };
        self.called.notify_waiters();

        match next {
            Some(Ok(response)) => {
                debug!(
                    wait_index = query.wait_index,
                    last_index = response.last_index,
                    "[MOCK] Listing allocations"
                );
                Ok(response)
            }
            Some(Err(body)) => Err(ClientError::Status { status: 503, body }),
            None => {
                // Script exhausted: block for the full wait and report no change.
                tokio::time::sleep(query.wait_time).await;
                Ok(ListResponse {
                    items: Vec::new(),
                    last_index: query.wait_index,
                })
            }
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Recording transport.
pub struct MockTransport {
    delivered: Mutex<Vec<Bytes>>,
    attempts: AtomicUsize,
    attempted: Notify,
    gate: Option<Semaphore>,
    fail: bool,
}

impl MockTransport {
    /// A transport that accepts every payload immediately.
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            attempted: Notify::new(),
            gate: None,
            fail: false,
        }
    }

    /// A transport where each delivery waits for a [`release`](Self::release).
    pub fn paused() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// A transport that fails every delivery.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Let `count` more deliveries through a paused transport.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Payloads delivered successfully, in completion order.
    pub fn delivered(&self) -> Vec<Bytes> {
        locked(&self.delivered).clone()
    }

    /// Number of delivery attempts started.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` delivery attempts have started.
    pub async fn wait_for_attempts(&self, count: usize) {
        wait_until(&self.attempted, || self.attempts() >= count).await;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn deliver(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempted.notify_waiters();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if self.fail {
            return Err(TransportError::Status(500));
        }

        locked(&self.delivered).push(Bytes::copy_from_slice(payload));
        Ok(())
    }
}

// =============================================================================
// Sink
// =============================================================================

/// Sink that records every `put` synchronously.
#[derive(Default)]
pub struct MockSink {
    puts: Mutex<Vec<Bytes>>,
    stopped: AtomicBool,
    stops: AtomicUsize,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads received by `put`, in call order.
    pub fn puts(&self) -> Vec<Bytes> {
        locked(&self.puts).clone()
    }

    /// Modify indexes of the allocations received by `put`.
    pub fn put_indexes(&self) -> Vec<u64> {
        self.puts()
            .iter()
            .filter_map(|payload| Allocation::from_payload(payload).ok())
            .map(|allocation| allocation.modify_index)
            .collect()
    }

    /// Number of `stop` calls.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MockSink {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn put(&self, payload: Bytes) -> Result<(), SinkError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SinkError::Stopped);
        }
        locked(&self.puts).push(payload);
        Ok(())
    }
}
