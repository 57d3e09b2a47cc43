use crate::core::error::StoreError;
use crate::core::snapshot::RateSnapshot;
use crate::core::store::{RateStore, check_version};
use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const PARTITION: &str = "rates";

/// Rate store backed by a fjall keyspace. Each base currency is one key holding the
/// JSON-encoded snapshot.
pub struct DiskRateStore {
    keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
    // Serializes the read-compare-write in `put`.
    write_lock: Mutex<()>,
}

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

impl DiskRateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path).map_err(storage_err)?;

        let keyspace = Config::new(path).open().map_err(storage_err)?;
        let partition = keyspace
            .open_partition(PARTITION, PartitionCreateOptions::default())
            .map_err(storage_err)?;
        Ok(Self {
            keyspace: Arc::new(keyspace),
            partition,
            write_lock: Mutex::new(()),
        })
    }

    fn read(&self, base_currency: &str) -> Result<Option<RateSnapshot>, StoreError> {
        self.partition
            .get(base_currency.as_bytes())
            .map_err(storage_err)?
            .map(|value| decode(base_currency, &value))
            .transpose()
    }
}

fn decode(base_currency: &str, value: &[u8]) -> Result<RateSnapshot, StoreError> {
    let snapshot: RateSnapshot = serde_json::from_slice(value)
        .map_err(|e| storage_err(format!("corrupt snapshot for {base_currency}: {e}")))?;
    snapshot.validate()?;
    Ok(snapshot)
}

#[async_trait]
impl RateStore for DiskRateStore {
    async fn get(&self, base_currency: &str) -> Result<Option<RateSnapshot>, StoreError> {
        let snapshot = self.read(base_currency)?;
        if snapshot.is_some() {
            debug!("Store HIT for base: {}", base_currency);
        } else {
            debug!("Store MISS for base: {}", base_currency);
        }
        Ok(snapshot)
    }

    async fn put(&self, snapshot: &RateSnapshot) -> Result<(), StoreError> {
        snapshot.validate()?;
        let encoded = serde_json::to_vec(snapshot).map_err(storage_err)?;

        let _guard = self.write_lock.lock().await;
        let base = snapshot.base_currency.as_str();
        // Read failures abort the write; only an undecodable value may be replaced.
        let stored = match self.partition.get(base.as_bytes()).map_err(storage_err)? {
            Some(value) => match decode(base, &value) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    warn!(base, error = %e, "Replacing unreadable stored snapshot");
                    None
                }
            },
            None => None,
        };
        check_version(stored.as_ref(), snapshot)?;

        self.partition
            .insert(snapshot.base_currency.as_bytes(), encoded)
            .map_err(storage_err)?;
        self.keyspace
            .persist(PersistMode::Buffer)
            .map_err(storage_err)?;
        debug!(
            "Store PUT for base: {} (version {})",
            snapshot.base_currency, snapshot.source_version
        );
        Ok(())
    }
}
