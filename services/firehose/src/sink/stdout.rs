//! Stdout sink - writes one payload per line.

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use super::queue::{QueueSink, Transport, TransportError};

/// Stdout sink.
pub type StdoutSink = QueueSink<StdoutTransport>;

/// Writes each payload followed by a newline.
///
/// Writes are serialized so concurrent workers never interleave lines.
pub struct StdoutTransport {
    out: Mutex<Stdout>,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn deliver(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut out = self.out.lock().await;
        out.write_all(payload).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }
}
