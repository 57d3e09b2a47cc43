use crate::core::error::StoreError;
use crate::core::snapshot::RateSnapshot;
use crate::core::store::{RateStore, check_version};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory rate store, used in tests and when the disk store is unavailable.
#[derive(Clone, Default)]
pub struct MemoryRateStore {
    inner: Arc<Mutex<HashMap<String, RateSnapshot>>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn get(&self, base_currency: &str) -> Result<Option<RateSnapshot>, StoreError> {
        let store = self.inner.lock().await;
        let snapshot = store.get(base_currency).cloned();
        if snapshot.is_some() {
            debug!("Store HIT for base: {}", base_currency);
        } else {
            debug!("Store MISS for base: {}", base_currency);
        }
        Ok(snapshot)
    }

    async fn put(&self, snapshot: &RateSnapshot) -> Result<(), StoreError> {
        snapshot.validate()?;
        let mut store = self.inner.lock().await;
        check_version(store.get(&snapshot.base_currency), snapshot)?;
        debug!(
            "Store PUT for base: {} (version {})",
            snapshot.base_currency, snapshot.source_version
        );
        store.insert(snapshot.base_currency.clone(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(version: u64, eur: f64) -> RateSnapshot {
        RateSnapshot::new("USD", [("EUR".to_string(), eur)], Utc::now(), version).unwrap()
    }

    #[tokio::test]
    async fn test_store_get_put() {
        let store = MemoryRateStore::new();

        // Initially, store is empty
        assert!(store.get("USD").await.unwrap().is_none());

        let first = snapshot(1, 0.92);
        store.put(&first).await.unwrap();
        assert_eq!(store.get("USD").await.unwrap(), Some(first));

        // Other bases are unaffected
        assert!(store.get("EUR").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_keeps_higher_version_on_out_of_order_puts() {
        let store = MemoryRateStore::new();

        // The newer fetch lands first, the older one completes late
        store.put(&snapshot(2, 0.93)).await.unwrap();
        let err = store.put(&snapshot(1, 0.92)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::StaleVersion {
                base: "USD".to_string(),
                stored: 2,
                attempted: 1,
            }
        );

        let stored = store.get("USD").await.unwrap().unwrap();
        assert_eq!(stored.source_version, 2);
        assert_eq!(stored.rates.get("EUR"), Some(&0.93));
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_snapshot() {
        let store = MemoryRateStore::new();
        let mut bad = snapshot(1, 0.92);
        bad.rates.clear();

        assert!(matches!(
            store.put(&bad).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(store.get("USD").await.unwrap().is_none());
    }
}
