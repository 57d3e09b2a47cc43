//! Error types shared across the cache, its fetchers and its stores.
//!
//! All errors are `Clone` so that one fetch outcome can be handed to every caller
//! that joined it.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("Invalid currency code: {0:?}")]
    InvalidCode(String),

    #[error("Snapshot for {0} has no rates")]
    Empty(String),

    #[error("Rate for {target} is not a positive finite number: {rate}")]
    InvalidRate { target: String, rate: f64 },
}

/// Failures of a single fetch from the rate source.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed rate response: {0}")]
    Parse(String),

    #[error("Rate source rejected the request: {0}")]
    Upstream(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Timeouts are classified with network failures for backoff purposes.
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout(_))
    }
}

impl From<SnapshotError> for FetchError {
    fn from(err: SnapshotError) -> Self {
        FetchError::Parse(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Rejected snapshot for {base}: version {attempted} is older than stored {stored}")]
    StaleVersion {
        base: String,
        stored: u64,
        attempted: u64,
    },

    #[error(transparent)]
    Invalid(#[from] SnapshotError),
}

/// Errors surfaced to callers of the rate cache.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    #[error("No {target} rate in the {base} snapshot")]
    MissingRate { base: String, target: String },
}

impl From<SnapshotError> for CacheError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::InvalidCode(code) => CacheError::InvalidCurrency(code),
            other => CacheError::Fetch(other.into()),
        }
    }
}
