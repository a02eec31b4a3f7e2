//! Single-shot shutdown signal shared by every firehose task.

use tokio::sync::watch;

/// A latch that can be triggered once and observed by any number of tasks.
///
/// Triggering an already-triggered latch is a no-op that reports `false`.
#[derive(Debug)]
pub struct ShutdownLatch {
    tx: watch::Sender<bool>,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A receiver observing the latch. Receivers created after the latch
    /// fired see it as already triggered.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Fire the latch. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        })
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the shutdown signal fires.
///
/// A dropped sender counts as shutdown.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|triggered| *triggered).await;
}
