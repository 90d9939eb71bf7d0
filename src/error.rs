//! Error taxonomy shared by every layer of the crate.
//!
//! Lock exhaustion is deliberately absent: failing to win a lease is reported as
//! `Ok(None)` by the lock layer and retried by the outer loops.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributionError {
    /// Invalid lock key, TTL, page size or heartbeat rate. Raised before touching the cache.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The same job key is already running inside this process.
    #[error("job {0} is already running in this process")]
    DuplicateRun(String),

    /// The cache backend rejected or failed an operation.
    #[error("cache operation failed: {0}")]
    Cache(String),

    #[error("failed to encode or decode cache value: {0}")]
    Codec(#[from] serde_json::Error),

    /// A business callback (`select_data_total`, `select_data_list`) failed.
    #[error("work callback failed: {0}")]
    Work(#[source] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DistributionError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DistributionError>;
