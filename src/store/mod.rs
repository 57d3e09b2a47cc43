pub mod disk;
pub mod memory;

use crate::core::store::RateStore;
use disk::DiskRateStore;
use memory::MemoryRateStore;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Opens the on-disk store under `data_dir`, falling back to an in-memory store when
/// the keyspace cannot be opened.
pub fn open(data_dir: &Path) -> Arc<dyn RateStore> {
    let path = data_dir.join("rates");
    match DiskRateStore::open(&path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Could not open rate store, keeping rates in memory only"
            );
            Arc::new(MemoryRateStore::new())
        }
    }
}
