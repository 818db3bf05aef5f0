//! Error types for gearman-client.

use bytes::Bytes;
use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum GearmanError {
    /// I/O error on a server socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed frame (bad magic, unknown type, oversized payload, missing field).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer closed, or nothing could be written to any peer.
    #[error("Network error: {0}")]
    Network(String),

    /// Context deadline, cancellation, or creation timeout.
    #[error("Operation timed out")]
    Timeout,

    /// Server answered a request with ERROR.
    #[error("Server error {code}: {text}")]
    Server { code: String, text: String },

    /// Server reported WORK_FAIL.
    #[error("Task failed")]
    TaskFailed,

    /// Server reported WORK_EXCEPTION with the given payload.
    #[error("Task raised an exception")]
    TaskException(Bytes),

    /// `wait` called on a background task.
    #[error("Background tasks cannot be waited on")]
    NotWaitable,

    /// Request targeted a server that is not configured.
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// Invalid client or task configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias using GearmanError.
pub type Result<T> = std::result::Result<T, GearmanError>;
