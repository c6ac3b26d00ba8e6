//! Errors returned by the queue manager.

use db::StoreError;
use queue_core::ConfigError;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Actor error: {0}")]
    Actor(String),
}

impl From<ractor::SpawnErr> for QueueError {
    fn from(err: ractor::SpawnErr) -> Self {
        QueueError::Actor(format!("Failed to spawn actor: {}", err))
    }
}
