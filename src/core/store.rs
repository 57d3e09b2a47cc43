//! Persistence abstraction for rate snapshots

use async_trait::async_trait;

use super::error::StoreError;
use super::snapshot::RateSnapshot;

/// Durable mapping from base currency to its last known snapshot.
///
/// Writes are atomic per base currency, and a snapshot older than the stored one
/// (by `source_version`) is rejected with [`StoreError::StaleVersion`].
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn get(&self, base_currency: &str) -> Result<Option<RateSnapshot>, StoreError>;

    async fn put(&self, snapshot: &RateSnapshot) -> Result<(), StoreError>;
}

/// Shared write-side check used by store implementations.
pub(crate) fn check_version(
    stored: Option<&RateSnapshot>,
    incoming: &RateSnapshot,
) -> Result<(), StoreError> {
    match stored {
        Some(stored) if stored.source_version > incoming.source_version => {
            Err(StoreError::StaleVersion {
                base: incoming.base_currency.clone(),
                stored: stored.source_version,
                attempted: incoming.source_version,
            })
        }
        _ => Ok(()),
    }
}
