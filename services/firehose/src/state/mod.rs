//! Local restore point persistence.
//!
//! The firehose itself only emits cursor values; this store is where the
//! binary keeps them between runs, one row per firehose name.

mod store;

pub use store::{persist_updates, CursorStore, StoreError};
