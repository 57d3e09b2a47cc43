use chrono::{TimeZone, Utc};
use fxcache::core::{Clock, ManualClock, RateStore};
use fxcache::providers::ExchangeRateApiFetcher;
use fxcache::store::disk::DiskRateStore;
use fxcache::{CacheSettings, RateCache};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const API_KEY: &str = "test-key";

mod test_utils {
    use super::API_KEY;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub fn latest_body(base: &str, eur: f64, gbp: f64) -> String {
        format!(
            r#"{{
                "result": "success",
                "base_code": "{base}",
                "conversion_rates": {{ "{base}": 1, "EUR": {eur}, "GBP": {gbp} }}
            }}"#
        )
    }

    pub async fn create_mock_server(base: &str, status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v6/{API_KEY}/latest/{base}")))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    /// Mock that fails the test on drop unless it was hit exactly `times` times.
    pub async fn create_counted_mock_server(base: &str, body: &str, times: u64) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v6/{API_KEY}/latest/{base}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(times)
            .mount(&mock_server)
            .await;
        mock_server
    }
}

fn write_config(dir: &tempfile::TempDir, base_url: &str) -> String {
    let config_path = dir.path().join("config.yaml");
    let data_path = dir.path().join("data");
    let config_content = format!(
        r#"
        provider:
          base_url: "{base_url}"
          api_key: "{API_KEY}"
        cache:
          max_age_mins: 60
          fetch_timeout_secs: 5
        data_path: "{}"
    "#,
        data_path.display()
    );
    fs::write(&config_path, config_content).expect("Failed to write config file");
    config_path.to_string_lossy().into_owned()
}

fn settings() -> CacheSettings {
    CacheSettings {
        max_age: Duration::from_secs(3600),
        fetch_timeout: Duration::from_secs(5),
    }
}

#[test_log::test(tokio::test)]
async fn test_get_command_with_mock() {
    let body = test_utils::latest_body("USD", 0.92, 0.79);
    let mock_server = test_utils::create_mock_server("USD", 200, &body).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());

    let result = fxcache::run_command(
        fxcache::AppCommand::Get {
            base: "usd".to_string(),
            targets: vec!["EUR".to_string()],
        },
        Some(&config_path),
    )
    .await;
    assert!(result.is_ok(), "Get command failed with: {:?}", result.err());
    assert!(dir.path().join("data").join("rates").exists());
}

#[test_log::test(tokio::test)]
async fn test_convert_command_with_mock() {
    let body = test_utils::latest_body("GBP", 1.17, 1.0);
    let mock_server = test_utils::create_mock_server("GBP", 200, &body).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());

    let result = fxcache::run_command(
        fxcache::AppCommand::Convert {
            amount: 100.0,
            from: "GBP".to_string(),
            to: "EUR".to_string(),
        },
        Some(&config_path),
    )
    .await;
    assert!(result.is_ok(), "Convert command failed with: {:?}", result.err());

    let missing = fxcache::run_command(
        fxcache::AppCommand::Convert {
            amount: 100.0,
            from: "GBP".to_string(),
            to: "CHF".to_string(),
        },
        Some(&config_path),
    )
    .await;
    assert!(missing.is_err());
}

#[test_log::test(tokio::test)]
async fn test_refresh_command_reports_upstream_error() {
    let body = r#"{"result": "error", "error-type": "invalid-key"}"#;
    let mock_server = test_utils::create_mock_server("USD", 200, body).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config_path = write_config(&dir, &mock_server.uri());

    let err = fxcache::run_command(
        fxcache::AppCommand::Refresh {
            base: "USD".to_string(),
        },
        Some(&config_path),
    )
    .await
    .unwrap_err();
    info!(error = %format!("{err:#}"), "Refresh failed as expected");
    assert!(format!("{err:#}").contains("invalid-key"));
}

#[test_log::test(tokio::test)]
async fn test_persisted_rates_served_without_fetching() {
    let body = test_utils::latest_body("USD", 0.92, 0.79);
    let mock_server = test_utils::create_counted_mock_server("USD", &body, 1).await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store: Arc<dyn RateStore> =
        Arc::new(DiskRateStore::open(dir.path()).expect("Failed to open store"));

    let first = {
        let fetcher = ExchangeRateApiFetcher::new(&mock_server.uri(), API_KEY).unwrap();
        let cache = RateCache::new(Arc::new(fetcher), Arc::clone(&store), settings());
        cache.read("USD").await.unwrap()
    };

    // A new cache over the same store, as after a restart
    let fetcher = ExchangeRateApiFetcher::new(&mock_server.uri(), API_KEY).unwrap();
    let cache = RateCache::new(Arc::new(fetcher), Arc::clone(&store), settings());
    let second = cache.read("USD").await.unwrap();

    assert_eq!(second.as_ref(), first.as_ref());
    assert_eq!(second.rate("GBP"), Some(0.79));
}

#[test_log::test(tokio::test)]
async fn test_stale_rates_refreshed_over_http() {
    let mock_server = test_utils::create_mock_server(
        "USD",
        200,
        &test_utils::latest_body("USD", 0.93, 0.80),
    )
    .await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store: Arc<dyn RateStore> =
        Arc::new(DiskRateStore::open(dir.path()).expect("Failed to open store"));

    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(t0));
    let old = fxcache::core::RateSnapshot::new(
        "USD",
        [("EUR".to_string(), 0.92), ("GBP".to_string(), 0.79)],
        t0,
        1,
    )
    .unwrap();
    store.put(&old).await.unwrap();
    clock.advance(chrono::Duration::minutes(61));

    let fetcher = ExchangeRateApiFetcher::new(&mock_server.uri(), API_KEY)
        .unwrap()
        .with_clock(clock.clone());
    let cache = RateCache::with_clock(Arc::new(fetcher), Arc::clone(&store), settings(), clock.clone());
    let mut updates = cache.subscribe("USD").await.unwrap();
    assert_eq!(updates.next().await.unwrap().rate("EUR"), Some(0.92));

    let served = cache.read("USD").await.unwrap();
    assert_eq!(served.rate("EUR"), Some(0.92));

    let refreshed = updates.next().await.unwrap();
    assert_eq!(refreshed.rate("EUR"), Some(0.93));
    assert_eq!(refreshed.fetched_at, clock.now());
    assert!(refreshed.source_version > 1);

    let stored = store.get("USD").await.unwrap().unwrap();
    assert_eq!(stored.rate("GBP"), Some(0.80));
}
