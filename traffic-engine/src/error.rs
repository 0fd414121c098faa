//! Typed outcomes for the engine's failure-tolerant side effects
//!
//! Nothing here is fatal to the host application. Callers (the engine's event
//! handlers) log these and carry on; tests assert on them directly.

use thiserror::Error;

/// Client storage failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Storage blocked or backing file unwritable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Write would exceed the scope's byte quota
    #[error("Storage quota exceeded writing {key} (limit {limit} bytes)")]
    QuotaExceeded { key: String, limit: usize },

    /// Stored value could not be decoded
    #[error("Corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Attribution dispatch failure or refusal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("User is not authenticated")]
    NotAuthenticated,

    #[error("Attribution already sent")]
    AlreadySent,

    #[error("No stored attribution record")]
    NoRecord,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend rejected attribution ({0}): {1}")]
    Rejected(u16, String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Analytics sink delivery failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Sink rejected call ({0}): {1}")]
    Rejected(u16, String),

    #[error("Sink misconfigured: {0}")]
    Misconfigured(String),
}
