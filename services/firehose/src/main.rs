//! Allocation firehose
//!
//! Streams allocation changes from Nomad into a delivery sink.
//!
//! ## Architecture
//!
//! - **Watcher**: Blocking queries against the allocation list, filtered by cursor
//! - **Sink**: Bounded queue drained by delivery workers
//! - **Restore point**: Cursor persisted in SQLite so restarts resume in place

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use firehose::config::Config;
use firehose::state::{persist_updates, CursorStore};
use firehose::{sink, Firehose, NomadClient};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        nomad_addr = %config.nomad.address,
        sink = config.sink.kind.name(),
        worker_count = config.sink.worker_count,
        state_path = %config.state_path,
        "Configuration loaded"
    );

    let api = Arc::new(NomadClient::new(&config.nomad)?);
    let sink = sink::from_config(&config.sink)?;
    let mut firehose = Firehose::new(api, sink);
    let name = firehose.name();

    // Resume from the last persisted cursor
    if let Some(parent) = Path::new(&config.state_path).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating state directory {}", parent.display()))?;
    }
    let store = CursorStore::open(&config.state_path)?;
    match store.load(&name)? {
        Some(value) => firehose.set_restore_value(value)?,
        None => info!(firehose = %name, "No restore point, starting from the beginning"),
    }

    let updates = firehose
        .take_updates()
        .await
        .context("cursor updates already taken")?;
    let firehose = Arc::new(firehose);

    let persist_handle = tokio::spawn(persist_updates(store, name.clone(), updates));

    let mut run_handle = tokio::spawn({
        let firehose = Arc::clone(&firehose);
        async move { firehose.start().await }
    });

    // Wait for shutdown signal
    let early_exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            None
        }
        result = &mut run_handle => Some(result),
    };

    firehose.stop().await;

    let result = match early_exit {
        Some(result) => result,
        None => run_handle.await,
    };
    match result {
        Ok(Ok(())) => info!("Firehose exited normally"),
        Ok(Err(e)) => error!(error = %e, "Firehose error"),
        Err(e) => error!(error = %e, "Firehose task panicked"),
    }

    // Dropping the last handle closes the update stream.
    drop(firehose);
    if let Err(e) = persist_handle.await {
        error!(error = %e, "Cursor persistence task panicked");
    }

    info!(firehose = %name, "Shutdown complete");
    Ok(())
}
