//! Rate snapshots and currency code handling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::SnapshotError;

/// Normalizes a currency code to its canonical upper-case form.
///
/// Codes are three ASCII letters (`usd`, `Eur`, `GBP`); anything else is rejected.
pub fn normalize_code(code: &str) -> Result<String, SnapshotError> {
    let trimmed = code.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(SnapshotError::InvalidCode(code.to_string()))
    }
}

/// An immutable, timestamped set of rates for one base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub base_currency: String,
    pub rates: BTreeMap<String, f64>,
    pub fetched_at: DateTime<Utc>,
    pub source_version: u64,
}

impl RateSnapshot {
    /// Builds a validated snapshot. Target codes are normalized; the rate map must be
    /// non-empty and every rate finite and positive.
    pub fn new(
        base_currency: &str,
        rates: impl IntoIterator<Item = (String, f64)>,
        fetched_at: DateTime<Utc>,
        source_version: u64,
    ) -> Result<Self, SnapshotError> {
        let base_currency = normalize_code(base_currency)?;
        let mut normalized = BTreeMap::new();
        for (target, rate) in rates {
            let target = normalize_code(&target)?;
            normalized.insert(target, rate);
        }

        let snapshot = Self {
            base_currency,
            rates: normalized,
            fetched_at,
            source_version,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Checks the persisted-snapshot invariants.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.rates.is_empty() {
            return Err(SnapshotError::Empty(self.base_currency.clone()));
        }
        if let Some((target, rate)) = self
            .rates
            .iter()
            .find(|(_, rate)| !rate.is_finite() || **rate <= 0.0)
        {
            return Err(SnapshotError::InvalidRate {
                target: target.clone(),
                rate: *rate,
            });
        }
        Ok(())
    }

    /// Rate from the base currency to `target`. The base itself always converts at 1.0.
    pub fn rate(&self, target: &str) -> Option<f64> {
        let target = normalize_code(target).ok()?;
        if target == self.base_currency {
            return Some(1.0);
        }
        self.rates.get(&target).copied()
    }

    /// Converts an amount in the base currency into `target`.
    pub fn convert(&self, amount: f64, target: &str) -> Option<f64> {
        self.rate(target).map(|rate| amount * rate)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.fetched_at)
    }
}
