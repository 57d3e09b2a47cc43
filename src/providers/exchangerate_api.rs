use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::core::config::ProviderConfig;
use crate::core::{Clock, FetchError, FetchedRates, RateFetcher, SystemClock};

/// Body of the `latest` endpoint. Failures come back as `result: "error"` with the
/// reason in `error-type`, sometimes with a 2xx status.
#[derive(Debug, Deserialize)]
struct LatestResponse {
    result: String,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    #[serde(default)]
    conversion_rates: BTreeMap<String, f64>,
}

/// Fetches latest rates from ExchangeRate-API (v6).
pub struct ExchangeRateApiFetcher {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl ExchangeRateApiFetcher {
    pub fn new(base_url: &str, api_key: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fxcache/0.1")
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        Self::new(&config.base_url, &config.api_key)
    }

    /// Stamps fetched rates with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl RateFetcher for ExchangeRateApiFetcher {
    #[instrument(name = "ExchangeRateFetch", skip(self), fields(base = %base_currency))]
    async fn fetch(&self, base_currency: &str) -> Result<FetchedRates, FetchError> {
        let url = format!(
            "{}/v6/{}/latest/{}",
            self.base_url, self.api_key, base_currency
        );
        debug!("Requesting latest rates");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("request for {base_currency} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("reading response failed: {e}")))?;

        if !status.is_success() {
            // The API reports some failures (bad key, unknown code) as 4xx with a JSON body.
            if let Ok(body) = serde_json::from_str::<LatestResponse>(&text)
                && let Some(kind) = body.error_type
            {
                return Err(FetchError::Upstream(kind));
            }
            return Err(FetchError::Network(format!(
                "HTTP {status} for {base_currency}"
            )));
        }

        let body: LatestResponse = serde_json::from_str(&text).map_err(|e| {
            error!(error = ?e, response = %text, "Failed to parse rates response");
            FetchError::Parse(e.to_string())
        })?;

        if body.result != "success" {
            return Err(FetchError::Upstream(
                body.error_type.unwrap_or(body.result),
            ));
        }
        if body.conversion_rates.is_empty() {
            return Err(FetchError::Parse(format!(
                "no conversion rates for {base_currency}"
            )));
        }

        debug!(rates = body.conversion_rates.len(), "Received latest rates");
        Ok(FetchedRates {
            rates: body.conversion_rates,
            fetched_at: self.clock.now(),
        })
    }
}
