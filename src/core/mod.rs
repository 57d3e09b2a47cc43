//! Core types and abstractions for the rate cache

pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod log;
pub mod snapshot;
pub mod staleness;
pub mod store;

// Re-export main types for cleaner imports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, FetchError, SnapshotError, StoreError};
pub use fetcher::{FetchedRates, RateFetcher};
pub use snapshot::{RateSnapshot, normalize_code};
pub use staleness::{Staleness, classify};
pub use store::RateStore;
