//! Allocation firehose library.
//!
//! The firehose watches the orchestrator's allocation list with blocking
//! queries and republishes every allocation change to a delivery sink. It
//! resumes from a persisted cursor after restarts and applies backpressure
//! instead of buffering without bound when the sink is slow.
//!
//! ## Architecture
//!
//! ```text
//! Firehose (supervisor)
//! ├── ChangeWatcher      (blocking list → allocations newer than the cursor)
//! ├── cursor publisher   (periodic + final cursor values for persistence)
//! └── Sink               (bounded queue → worker pool → transport)
//! ```
//!
//! ## Modules
//!
//! - `client`: orchestrator allocation list API and its Nomad HTTP client
//! - `watcher`: the resumable change watcher
//! - `sink`: delivery queue, worker pool and transports (http, stdout)
//! - `supervisor`: lifecycle wiring and the cursor update stream
//! - `restore` / `state`: typed restore values and their SQLite store

pub mod client;
pub mod config;
pub mod mock;
pub mod restore;
pub mod shutdown;
pub mod sink;
pub mod state;
pub mod supervisor;
pub mod watcher;

// Re-export commonly used types
pub use client::{AllocationsApi, ListQuery, ListResponse, NomadClient};
pub use restore::{RestoreError, RestoreValue};
pub use sink::{Sink, SinkError};
pub use supervisor::{Firehose, FirehoseError};
pub use watcher::{ChangeWatcher, WatcherConfig};
