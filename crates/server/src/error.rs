use std::time::Duration;
use thiserror::Error;

/// Failure of the external fetch collaborator. Always local to one poll
/// attempt; never escalated to a resource state change.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timeout after {0:?} while fetching resource status")]
    Timeout(Duration),
    #[error("Source session expired")]
    AuthExpired,
    #[error("Resource not found on source")]
    NotFound,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Malformed status reading: {0}")]
    InvalidReading(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::NotFound)
    }
}

/// Failure of a single notification channel for a single delivery. Never
/// blocks the other channels of the same job.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Timeout after {0:?} while delivering")]
    Timeout(Duration),
    #[error("Channel returned HTTP {status}: {context}")]
    Http { status: u16, context: String },
    #[error("Delivery rejected: {0}")]
    Rejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure of the subscriber directory collaborator.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Unknown subscriber: {0}")]
    UnknownSubscriber(String),
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] sea_orm::DbErr),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl CoreError {
    /// Store unavailability is the only fatal condition: no invariant can be
    /// guaranteed without the backing store, so the affected worker pool
    /// stops instead of looping on errors.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            CoreError::Store(sea_orm::DbErr::Conn(_))
                | CoreError::Store(sea_orm::DbErr::ConnectionAcquire(_))
        )
    }
}
