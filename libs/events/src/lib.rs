//! # firehose-events
//!
//! Event types and payload serialization for the allocation firehose.
//!
//! ## Design Principles
//!
//! - An event is an allocation stub exactly as the orchestrator listed it
//! - Only `ModifyIndex` is interpreted; every other field is carried opaquely
//! - Events are immutable once received
//! - The wire payload is the JSON encoding of the stub, unchanged
//!
//! ## Ordering
//!
//! `ModifyIndex` is the orchestrator's raft index of the last change to the
//! allocation. The firehose compares it against its cursor to decide whether
//! an allocation is new since the previous poll.

mod allocation;
mod error;

pub use allocation::Allocation;
pub use error::EventError;
