//! Rate source abstractions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::error::FetchError;

/// Raw result of one fetch from a rate source, before it is stamped with a version.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRates {
    pub rates: BTreeMap<String, f64>,
    pub fetched_at: DateTime<Utc>,
}

/// Fetches the latest rates for a base currency.
///
/// Implementations make a single attempt; timeouts and retries are applied by the
/// cache.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    async fn fetch(&self, base_currency: &str) -> Result<FetchedRates, FetchError>;
}
