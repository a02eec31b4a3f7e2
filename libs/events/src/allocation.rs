//! Allocation stub - the event record published by the firehose.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EventError;

/// An allocation as returned by the orchestrator's allocation list.
///
/// Only `ModifyIndex` is typed. The remaining fields (`ID`, `JobID`,
/// `ClientStatus`, task states, ...) are kept as-is so that the published
/// payload matches what the orchestrator reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Raft index of the last modification to this allocation.
    #[serde(rename = "ModifyIndex")]
    pub modify_index: u64,

    /// All other fields of the stub.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Allocation {
    /// Create an allocation with no fields besides its modify index.
    pub fn new(modify_index: u64) -> Self {
        Self {
            modify_index,
            fields: Map::new(),
        }
    }

    /// Set a field, returning the updated allocation.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Allocation ID, when present.
    pub fn id(&self) -> Option<&str> {
        self.str_field("ID")
    }

    /// Job ID, when present.
    pub fn job_id(&self) -> Option<&str> {
        self.str_field("JobID")
    }

    /// Client status (pending, running, complete, failed, lost), when present.
    pub fn client_status(&self) -> Option<&str> {
        self.str_field("ClientStatus")
    }

    /// Encode the allocation as the JSON payload handed to sinks.
    pub fn to_payload(&self) -> Result<Vec<u8>, EventError> {
        if self.fields.contains_key("ModifyIndex") {
            return Err(EventError::InvalidPayload(
                "ModifyIndex present in opaque fields".to_string(),
            ));
        }

        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an allocation from a JSON payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(payload)?)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}
