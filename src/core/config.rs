use anyhow::{Context, Result, ensure};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let api_key = if self.api_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &api_key)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://v6.exchangerate-api.com".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which a snapshot is served stale and refreshed in the background.
    pub max_age_mins: u64,
    /// Upper bound on a single fetch.
    pub fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_age_mins: 60,
            fetch_timeout_secs: 10,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        minutes(self.max_age_mins)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Minutes from config as a `Duration`, saturating instead of overflowing.
pub(crate) fn minutes(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SchedulerSettings {
    pub interval_mins: u64,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
    /// Bases read within this window keep being refreshed in the background.
    pub recent_read_window_mins: u64,
    /// Bases refreshed regardless of read traffic.
    pub currencies: Vec<String>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            interval_mins: 60,
            retry_base_secs: 30,
            retry_max_secs: 30 * 60,
            recent_read_window_mins: 24 * 60,
            currencies: ["USD", "EUR", "GBP", "TRY"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "fxcache", "fxcache")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "fxcache", "fxcache")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// Rejects settings that would make the scheduler spin or break the backoff
    /// progression.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.cache.fetch_timeout_secs > 0,
            "cache.fetch_timeout_secs must be greater than zero"
        );
        let scheduler = &self.scheduler;
        ensure!(
            scheduler.interval_mins > 0,
            "scheduler.interval_mins must be greater than zero"
        );
        ensure!(
            scheduler.retry_base_secs > 0,
            "scheduler.retry_base_secs must be greater than zero"
        );
        ensure!(
            scheduler.retry_base_secs <= scheduler.retry_max_secs,
            "scheduler.retry_base_secs ({}) must not exceed scheduler.retry_max_secs ({})",
            scheduler.retry_base_secs,
            scheduler.retry_max_secs
        );
        Ok(())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
