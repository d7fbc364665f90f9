//! Error handling for the alert core
//!
//! All fallible core operations return [`Result`]. The taxonomy follows the
//! propagation policy of the ingestion path: transient lookup misses are
//! retried, payload and store failures are logged and degrade to "no visible
//! notification", and only call-site-local failures (`EmptyQueue`) surface to
//! the caller.

use thiserror::Error;

/// Result type for alert-core operations
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors that can occur inside the alert core
#[derive(Error, Debug)]
pub enum AlertError {
    /// No matching persisted message was found on this attempt
    ///
    /// Retried inside the reconciliation loop and never surfaced past it.
    #[error("no matching persisted message found yet")]
    TransientNotFound,

    /// An arrival event carried an unusable payload
    ///
    /// The event is dropped silently; at worst no notification is shown.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A write against the persistent message store failed
    ///
    /// Treated as a logged no-op, never propagated as a crash.
    #[error("store write failed: {0}")]
    StoreWrite(String),

    /// A resource limit was hit (e.g. an oversized contact photo)
    ///
    /// Degrades to "resource not available" for the caller.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A queue removal is already in flight
    ///
    /// Returned synchronously; the caller must not spin-retry, the in-flight
    /// removal clears the guard itself.
    #[error("queue removal already in flight")]
    QueueBusy,

    /// The active message was requested from a zero-length queue
    ///
    /// Fatal to that call site only, not to the process.
    #[error("message queue is empty")]
    EmptyQueue,

    /// A presentation collaborator (notification service, popup surface)
    /// failed
    ///
    /// Logged by the decision engine; the pipeline continues.
    #[error("presentation failed: {0}")]
    Presentation(String),

    /// Configuration is invalid or missing
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlertError {
    /// Whether this error may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AlertError::TransientNotFound | AlertError::StoreWrite(_) | AlertError::Io(_)
        )
    }

    /// Create a malformed-payload error
    pub fn malformed(msg: impl Into<String>) -> Self {
        AlertError::MalformedPayload(msg.into())
    }

    /// Create a store-write error
    pub fn store_write(msg: impl Into<String>) -> Self {
        AlertError::StoreWrite(msg.into())
    }

    /// Create a presentation error
    pub fn presentation(msg: impl Into<String>) -> Self {
        AlertError::Presentation(msg.into())
    }
}
