//! Error taxonomy for the sync engine.
//!
//! Storage backends speak `anyhow` (see [`pawtrack_core::store`]); the
//! gateway, processor and record services classify failures into
//! [`SyncError`] so callers can tell transient from fatal conditions.

use std::time::Duration;

use pawtrack_core::models::Collection;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Missing proxy URL, credential, or remote database mapping.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// HTTP 429 from the remote service.
    #[error("rate limited by remote service (retry after {}s)", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// Any other non-2xx response.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// An update reached the head of the queue but its record has no
    /// remote counterpart yet.
    #[error("{collection} record {id} has no remote id yet")]
    MissingRemoteId { collection: Collection, id: String },

    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: String },

    #[error("invalid {collection} record: {reason}")]
    Validation {
        collection: Collection,
        reason: String,
    },

    /// Local store or queue I/O.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimited { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }

    /// Errors that stop a whole drain instead of one entry.
    pub fn aborts_drain(&self) -> bool {
        matches!(self, SyncError::Configuration(_) | SyncError::Storage(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(err.into())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
