//! Error types for the replicated store.

use thiserror::Error;

use crate::http_client::HttpError;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to (or running) the replicated store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is not reachable or not ready to serve.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Http(#[from] HttpError),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The store rejected a statement.
    #[error("statement error: {0}")]
    Statement(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("failed to launch store process: {0}")]
    Launch(String),

    #[error("store process exited: {0}")]
    Exited(String),
}
