use thiserror::Error;

use crate::domain::{HeaderError, QueueId};

/// Failures of a storage backend.
///
/// Stores only fail with infrastructure errors; protocol outcomes such as
/// "lease no longer held" are reported through return values.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection loss, timeout, or a backend that is temporarily down.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate message id: {0}")]
    Duplicate(QueueId),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the queue protocol.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The heartbeat no longer matches: another reclaimer took the message back.
    #[error("lease lost for message {0}")]
    LeaseLost(QueueId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to encode message body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type Result<T> = std::result::Result<T, QueueError>;
