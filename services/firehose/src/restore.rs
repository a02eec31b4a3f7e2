//! Restore values loaded from external storage.
//!
//! Whatever the backing store holds is converted into a [`RestoreValue`]
//! once, at the storage boundary. Only the `Int` variant can seed a cursor.

use thiserror::Error;

/// Errors from applying a restore value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RestoreError {
    #[error("unknown restore type '{0}'")]
    InvalidRestoreType(String),

    #[error("restore value {0} is negative")]
    Negative(i64),
}

/// A persisted cursor as read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreValue {
    /// An integer cursor.
    Int(i64),

    /// Anything else; carries a description of what was found.
    Invalid(String),
}

impl RestoreValue {
    /// Interpret the value as a cursor.
    pub fn cursor(&self) -> Result<u64, RestoreError> {
        match self {
            RestoreValue::Int(value) => {
                u64::try_from(*value).map_err(|_| RestoreError::Negative(*value))
            }
            RestoreValue::Invalid(found) => Err(RestoreError::InvalidRestoreType(found.clone())),
        }
    }
}

impl From<rusqlite::types::Value> for RestoreValue {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value;

        match value {
            Value::Integer(i) => RestoreValue::Int(i),
            Value::Null => RestoreValue::Invalid("null".to_string()),
            Value::Real(r) => RestoreValue::Invalid(format!("real {r}")),
            Value::Text(s) => RestoreValue::Invalid(format!("text '{s}'")),
            Value::Blob(b) => RestoreValue::Invalid(format!("blob of {} bytes", b.len())),
        }
    }
}
