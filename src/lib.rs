pub mod cli;
pub mod coordinator;
pub mod core;
pub mod providers;
pub mod scheduler;
pub mod store;

pub use coordinator::{CacheSettings, RateCache, RefreshState, Subscription};
pub use crate::core::config;
pub use scheduler::{RefreshScheduler, SchedulerConfig, SchedulerHandle};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::providers::ExchangeRateApiFetcher;

pub enum AppCommand {
    Get { base: String, targets: Vec<String> },
    Refresh { base: String },
    Convert { amount: f64, from: String, to: String },
    Watch { bases: Vec<String> },
}

/// Builds the rate cache described by `config`: the HTTP rate source in front of the
/// on-disk store.
pub fn build_cache(config: &AppConfig) -> Result<RateCache> {
    if config.provider.api_key.is_empty() {
        warn!("No provider.api_key configured, requests to the rate source will be rejected");
    }
    let fetcher = ExchangeRateApiFetcher::from_config(&config.provider)
        .context("Failed to create HTTP client")?;
    let data_path = config.default_data_path()?;
    debug!(path = %data_path.display(), "Using data directory");
    let store = store::open(&data_path);

    Ok(RateCache::new(
        Arc::new(fetcher),
        store,
        config.cache.clone().into(),
    ))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fxcache starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let cache = build_cache(&config)?;

    match command {
        AppCommand::Get { base, targets } => cli::rates::get(&cache, &base, &targets).await,
        AppCommand::Refresh { base } => cli::rates::refresh(&cache, &base).await,
        AppCommand::Convert { amount, from, to } => {
            cli::convert::run(&cache, amount, &from, &to).await
        }
        AppCommand::Watch { bases } => {
            cli::watch::run(&cache, config.scheduler.clone().into(), &bases).await
        }
    }
}
