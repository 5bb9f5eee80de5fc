use std::time::Duration;

use crate::model::{ActivityType, UserId};

/// Low-level storage errors (RocksDB, serialization).
/// This is the error type for the `ActivityStore` trait. Storage operations
/// can only fail with infrastructure errors, never scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Outcome of a failed upstream call (poll, stream open or stream read).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Expected and self-healing. Upstream may report how many calls remain
    /// in the current window and when it resets.
    #[error("rate limited by upstream")]
    RateLimited {
        remaining: Option<u32>,
        reset_in: Option<Duration>,
    },

    /// Terminal for the user: credentials were rejected.
    #[error("invalid credentials: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

/// Caller-misuse signals from the polling side. Returned synchronously;
/// no state is mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("user {0} is owned by the stream queue")]
    AlreadyStreaming(UserId),

    #[error("user {0} is not queued for {1}")]
    NotQueued(UserId, ActivityType),
}

/// Caller-misuse and capacity signals from the streaming side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("user {0} already has a live stream")]
    AlreadyConnected(UserId),

    #[error("user {0} has no stream")]
    NotConnected(UserId),

    #[error("stream capacity exhausted ({0} connections)")]
    CapacityExhausted(usize),

    #[error("stream queue is shutting down")]
    ShuttingDown,
}

/// Errors from moving a user between the polling and streaming queues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    #[error("user {0} has no polling entry to upgrade")]
    NotQueued(UserId),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from scheduler lifecycle operations (startup recovery, shutdown).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("dispatch task panicked: {0}")]
    TaskPanicked(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
