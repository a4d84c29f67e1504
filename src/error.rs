//! Error types shared by the service clients and the cloner.

use thiserror::Error;

/// Failure talking to the task/snapshot service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid service url: {0}")]
    Url(#[from] url::ParseError),

    #[error("change feed closed")]
    FeedClosed,

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Status { status: 404, .. })
    }
}

/// Failure duplicating a project.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("project not found: {0}")]
    NotFound(String),

    #[error("{entity} {id} references unknown {reference}")]
    Validation {
        entity: &'static str,
        id: String,
        reference: String,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
