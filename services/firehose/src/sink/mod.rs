//! Delivery sinks.
//!
//! A sink accepts serialized events with [`Sink::put`] and delivers them to
//! some destination in the background. Every sink here is a [`QueueSink`]:
//! a bounded queue drained by a pool of workers, parameterised by the
//! [`Transport`] that performs a single delivery.
//!
//! ```text
//! put() ──► bounded queue (capacity C) ──► worker 0..N ──► Transport::deliver
//! ```

mod http;
mod queue;
mod stdout;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::{SinkConfig, SinkKind};

pub use http::{HttpSink, HttpTransport};
pub use queue::{QueueSink, SinkState, Transport, TransportError, DEFAULT_QUEUE_CAPACITY};
pub use stdout::{StdoutSink, StdoutTransport};

/// Errors from sink construction and lifecycle.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    Config(String),

    #[error("sink cannot be started from state {0:?}")]
    InvalidState(SinkState),

    #[error("sink is stopped")]
    Stopped,

    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// A delivery target for serialized events.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Static identifier of the transport, e.g. `http`.
    fn name(&self) -> &'static str;

    /// Spawn the delivery workers.
    async fn start(&self) -> Result<(), SinkError>;

    /// Wait for every accepted payload to be delivered or logged as failed,
    /// then stop the workers. Calling it again is a no-op.
    async fn stop(&self);

    /// Enqueue a payload, waiting while the queue is full.
    async fn put(&self, payload: Bytes) -> Result<(), SinkError>;
}

/// Build the sink selected by configuration.
pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn Sink>, SinkError> {
    let sink: Arc<dyn Sink> = match &config.kind {
        SinkKind::Http { address } => Arc::new(HttpSink::new(
            HttpTransport::new(address)?,
            config.worker_count,
            config.queue_capacity,
        )),
        SinkKind::Stdout => Arc::new(StdoutSink::new(
            StdoutTransport::new(),
            config.worker_count,
            config.queue_capacity,
        )),
    };

    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_selects_transport() {
        let http = from_config(&SinkConfig {
            kind: SinkKind::Http {
                address: "http://127.0.0.1:9000/events".to_string(),
            },
            worker_count: 2,
            queue_capacity: 16,
        })
        .unwrap();
        assert_eq!(http.name(), "http");

        let stdout = from_config(&SinkConfig {
            kind: SinkKind::Stdout,
            worker_count: 1,
            queue_capacity: 16,
        })
        .unwrap();
        assert_eq!(stdout.name(), "stdout");
    }

    #[test]
    fn test_from_config_rejects_empty_address() {
        let result = from_config(&SinkConfig {
            kind: SinkKind::Http {
                address: String::new(),
            },
            worker_count: 1,
            queue_capacity: 16,
        });
        assert!(matches!(result, Err(SinkError::Config(_))));
    }
}
