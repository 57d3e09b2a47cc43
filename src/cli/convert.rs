use anyhow::{Context, Result};

use super::ui;
use crate::coordinator::RateCache;
use crate::core::{CacheError, normalize_code};

/// Converts `amount` of `from` into `to` using the cached `from` snapshot.
pub async fn convert(
    cache: &RateCache,
    amount: f64,
    from: &str,
    to: &str,
) -> Result<f64, CacheError> {
    let target = normalize_code(to)?;
    let snapshot = cache.read(from).await?;
    snapshot
        .convert(amount, &target)
        .ok_or_else(|| CacheError::MissingRate {
            base: snapshot.base_currency.clone(),
            target,
        })
}

pub async fn run(cache: &RateCache, amount: f64, from: &str, to: &str) -> Result<()> {
    let spinner = ui::new_spinner("Loading rates");
    let converted = convert(cache, amount, from, to).await;
    spinner.finish_and_clear();
    let converted =
        converted.with_context(|| format!("Failed to convert {amount} {from} to {to}"))?;

    println!(
        "{} {} = {} {}",
        amount,
        from.trim().to_uppercase(),
        ui::style_text(&ui::format_rate(converted), ui::StyleType::Value),
        to.trim().to_uppercase()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CacheSettings;
    use crate::core::fetcher::mock::MockFetcher;
    use crate::core::{Clock, SystemClock};
    use crate::store::memory::MemoryRateStore;
    use std::sync::Arc;

    fn cache() -> RateCache {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fetcher = MockFetcher::new(clock)
            .script("USD", vec![Ok(vec![("EUR", 0.92), ("TRY", 32.0)])]);
        RateCache::new(
            Arc::new(fetcher),
            Arc::new(MemoryRateStore::new()),
            CacheSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_convert_amount() {
        let cache = cache();
        let converted = convert(&cache, 250.0, "usd", "try").await.unwrap();
        assert!((converted - 8000.0).abs() < 1e-9);
        assert_eq!(convert(&cache, 10.0, "USD", "USD").await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_convert_missing_rate() {
        let cache = cache();
        let err = convert(&cache, 1.0, "USD", "CHF").await.unwrap_err();
        assert_eq!(
            err,
            CacheError::MissingRate {
                base: "USD".to_string(),
                target: "CHF".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_convert_rejects_invalid_target_without_fetching() {
        let cache = cache();
        let err = convert(&cache, 1.0, "USD", "euro").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidCurrency(_)));
        assert!(cache.peek("USD").await.unwrap().is_none());
    }
}
