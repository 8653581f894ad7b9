//! Error types for orchestrator integration.

use agassi_store::StoreError;
use agassi_store::http_client::HttpError;
use thiserror::Error;

/// A descriptor that cannot become a `ServiceRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelValidationError {
    #[error("missing requisite labels: {}", .0.join(", "))]
    MissingLabels(Vec<String>),

    #[error("invalid port label {0:?}")]
    InvalidPort(String),

    #[error("unknown protocol label {0:?}")]
    UnknownProtocol(String),
}

/// Errors from reconciling a descriptor into the store.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("service {id}: {source}")]
    Validation {
        id: String,
        #[source]
        source: LabelValidationError,
    },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors talking to the orchestrator API.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("orchestrator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode orchestrator response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no network labelled {key}={value}")]
    NetworkNotFound { key: String, value: String },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
