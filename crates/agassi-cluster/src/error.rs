//! Error types for cluster coordination.

use agassi_store::StoreError;
use thiserror::Error;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by discovery and bootstrap.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Socket-level discovery failure (bind, send, receive).
    #[error("discovery error: {0}")]
    Discovery(#[from] std::io::Error),

    #[error("discovery already started")]
    AlreadyStarted,

    #[error("invalid subnet {0:?}")]
    InvalidSubnet(String),

    /// The store could not be launched after the bootstrap decision.
    #[error("store bootstrap failed: {0}")]
    Store(#[from] StoreError),

    #[error("store process exited: {0}")]
    StoreExited(String),
}
