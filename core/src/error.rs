use std::time::Duration;

use chat_api::ModelError;
use thiserror::Error;

/// Failure reported by a backend service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Errors surfaced by the synchronization engine and the client services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The backend failed a page fetch, subscribe or write.
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] BackendError),
    /// The backend did not answer within the configured bound. Retriable.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// A result arrived for an activation that has since been replaced.
    #[error("result belongs to a stale activation")]
    StaleActivation,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    /// Whether repeating the same call may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout(_) | SyncError::FetchFailed(BackendError::Unavailable(_))
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
