//! The rate cache.
//!
//! [`RateCache`] is the only owner of cached snapshots. It serves reads from memory,
//! falls back to the persisted store on first access, and refreshes from the rate
//! source. For any base currency at most one fetch is in flight; every caller that
//! needs a fetch while one is running joins it and receives the same outcome.
//!
//! Fetches run as detached tasks, so a fetch completes and updates the store even
//! when every caller that asked for it has gone away.

mod subscription;

pub use subscription::Subscription;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock, watch};
use tracing::{debug, info, warn};

use crate::core::config::CacheConfig;
use crate::core::{
    CacheError, Clock, FetchError, RateFetcher, RateSnapshot, RateStore, Staleness, StoreError,
    SystemClock, classify, normalize_code,
};

type FetchOutcome = Result<Arc<RateSnapshot>, CacheError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

const NEVER_READ: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshState {
    Idle,
    InFlight {
        started_at: DateTime<Utc>,
    },
    Failed {
        last_error: FetchError,
        failed_at: DateTime<Utc>,
        consecutive_failures: u32,
    },
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_age: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheConfig::default().into()
    }
}

impl From<CacheConfig> for CacheSettings {
    fn from(config: CacheConfig) -> Self {
        Self {
            max_age: config.max_age(),
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

struct EntryState {
    loaded: bool,
    snapshot: Option<Arc<RateSnapshot>>,
    refresh: RefreshState,
    failures: u32,
    in_flight: Option<(u64, SharedFetch)>,
    degraded: bool,
}

struct Entry {
    base_currency: String,
    state: Mutex<EntryState>,
    updates: watch::Sender<Option<Arc<RateSnapshot>>>,
    last_read_ms: AtomicI64,
}

impl Entry {
    fn new(base_currency: String) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            base_currency,
            state: Mutex::new(EntryState {
                loaded: false,
                snapshot: None,
                refresh: RefreshState::Idle,
                failures: 0,
                in_flight: None,
                degraded: false,
            }),
            updates,
            last_read_ms: AtomicI64::new(NEVER_READ),
        }
    }

    fn publish(&self, state: &mut EntryState, snapshot: Arc<RateSnapshot>) {
        state.snapshot = Some(Arc::clone(&snapshot));
        self.updates.send_replace(Some(snapshot));
    }
}

struct Inner {
    fetcher: Arc<dyn RateFetcher>,
    store: Arc<dyn RateStore>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    entries: RwLock<HashMap<String, Arc<Entry>>>,
    versions: AtomicU64,
}

/// Handle to the shared rate cache. Cloning is cheap and every clone talks to the
/// same cache.
#[derive(Clone)]
pub struct RateCache {
    inner: Arc<Inner>,
}

impl RateCache {
    pub fn new(
        fetcher: Arc<dyn RateFetcher>,
        store: Arc<dyn RateStore>,
        settings: CacheSettings,
    ) -> Self {
        Self::with_clock(fetcher, store, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        fetcher: Arc<dyn RateFetcher>,
        store: Arc<dyn RateStore>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                clock,
                settings,
                entries: RwLock::new(HashMap::new()),
                versions: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Current time as seen by the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Classifies a snapshot the way [`RateCache::read`] would right now.
    pub fn staleness_of(&self, snapshot: Option<&RateSnapshot>) -> Staleness {
        classify(snapshot, self.now(), self.inner.settings.max_age)
    }

    /// Returns the cached snapshot for `base_currency`.
    ///
    /// Fresh snapshots are returned as is. Stale snapshots are returned immediately
    /// while a refresh runs in the background; its failure is logged, not returned.
    /// Only when nothing is cached does the call wait for a fetch, and then the
    /// fetch error is returned if it fails.
    pub async fn read(&self, base_currency: &str) -> Result<Arc<RateSnapshot>, CacheError> {
        let entry = self.inner.entry(base_currency).await?;
        let now = self.inner.clock.now();
        entry
            .last_read_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);

        let pending = {
            let mut state = self.inner.lock_loaded(&entry).await;
            let staleness = classify(state.snapshot.as_deref(), now, self.inner.settings.max_age);
            match (staleness, state.snapshot.clone()) {
                (Staleness::Fresh, Some(snapshot)) => {
                    debug!(base = %entry.base_currency, "Cache HIT");
                    return Ok(snapshot);
                }
                (Staleness::Stale, Some(snapshot)) => {
                    debug!(base = %entry.base_currency, "Cache HIT (stale), refreshing in background");
                    // The fetch task logs its own failure.
                    let _ = self.inner.dispatch(&entry, &mut state);
                    return Ok(snapshot);
                }
                _ => {
                    debug!(base = %entry.base_currency, "Cache MISS, waiting for fetch");
                    self.inner.dispatch(&entry, &mut state)
                }
            }
        };
        pending.await
    }

    /// Fetches `base_currency` regardless of staleness, joining a fetch that is
    /// already running.
    pub async fn refresh(&self, base_currency: &str) -> Result<Arc<RateSnapshot>, CacheError> {
        let entry = self.inner.entry(base_currency).await?;
        let pending = {
            let mut state = self.inner.lock_loaded(&entry).await;
            self.inner.dispatch(&entry, &mut state)
        };
        pending.await
    }

    /// Subscribes to snapshot updates for `base_currency`. The latest known snapshot,
    /// including one only present in the store so far, is delivered first.
    pub async fn subscribe(&self, base_currency: &str) -> Result<Subscription, CacheError> {
        let entry = self.inner.entry(base_currency).await?;
        drop(self.inner.lock_loaded(&entry).await);
        Ok(Subscription::new(
            entry.base_currency.clone(),
            entry.updates.subscribe(),
        ))
    }

    /// Current snapshot without triggering any fetch.
    pub async fn peek(&self, base_currency: &str) -> Result<Option<Arc<RateSnapshot>>, CacheError> {
        let entry = self.inner.entry(base_currency).await?;
        let state = self.inner.lock_loaded(&entry).await;
        Ok(state.snapshot.clone())
    }

    pub async fn refresh_state(&self, base_currency: &str) -> Result<RefreshState, CacheError> {
        let entry = self.inner.entry(base_currency).await?;
        let state = entry.state.lock().await;
        Ok(state.refresh.clone())
    }

    /// Whether the last write for `base_currency` failed to reach the store, so the
    /// cached snapshot currently lives in memory only.
    pub async fn is_degraded(&self, base_currency: &str) -> Result<bool, CacheError> {
        let entry = self.inner.entry(base_currency).await?;
        let state = entry.state.lock().await;
        Ok(state.degraded)
    }

    /// Bases with an active subscriber or a read within `recent_window`.
    pub async fn tracked_currencies(&self, recent_window: Duration) -> Vec<String> {
        let now_ms = self.inner.clock.now().timestamp_millis();
        let window_ms = i64::try_from(recent_window.as_millis()).unwrap_or(i64::MAX);
        let entries = self.inner.entries.read().await;

        let mut tracked: Vec<String> = entries
            .values()
            .filter(|entry| {
                let last_read = entry.last_read_ms.load(Ordering::Relaxed);
                entry.updates.receiver_count() > 0
                    || (last_read != NEVER_READ && now_ms.saturating_sub(last_read) <= window_ms)
            })
            .map(|entry| entry.base_currency.clone())
            .collect();
        tracked.sort();
        tracked
    }
}

impl Inner {
    async fn entry(&self, base_currency: &str) -> Result<Arc<Entry>, CacheError> {
        let base = normalize_code(base_currency)?;
        if let Some(entry) = self.entries.read().await.get(&base) {
            return Ok(Arc::clone(entry));
        }
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(base.clone())
            .or_insert_with(|| Arc::new(Entry::new(base)));
        Ok(Arc::clone(entry))
    }

    /// Locks the entry, loading the persisted snapshot on first access.
    async fn lock_loaded<'a>(&self, entry: &'a Entry) -> MutexGuard<'a, EntryState> {
        let mut state = entry.state.lock().await;
        if !state.loaded {
            state.loaded = true;
            match self.store.get(&entry.base_currency).await {
                Ok(Some(stored)) => {
                    debug!(
                        base = %entry.base_currency,
                        version = stored.source_version,
                        "Loaded snapshot from store"
                    );
                    self.versions
                        .fetch_max(stored.source_version, Ordering::SeqCst);
                    entry.publish(&mut state, Arc::new(stored));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        base = %entry.base_currency,
                        error = %e,
                        "Could not load stored snapshot, continuing in memory"
                    );
                    state.degraded = true;
                }
            }
        }
        state
    }

    /// Returns the in-flight fetch for the entry, starting one if none is running.
    ///
    /// Must be called with the entry locked; the spawned task needs the same lock to
    /// finish, so it cannot complete before `in_flight` is recorded.
    fn dispatch(self: &Arc<Self>, entry: &Arc<Entry>, state: &mut EntryState) -> SharedFetch {
        if let Some((_, pending)) = &state.in_flight {
            debug!(base = %entry.base_currency, "Joining in-flight fetch");
            return pending.clone();
        }

        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        state.refresh = RefreshState::InFlight {
            started_at: self.clock.now(),
        };

        let task = tokio::spawn(Arc::clone(self).run_fetch(Arc::clone(entry), version));
        let pending = async move {
            task.await.unwrap_or_else(|e| {
                Err(FetchError::Network(format!("fetch task failed: {e}")).into())
            })
        }
        .boxed()
        .shared();
        state.in_flight = Some((version, pending.clone()));
        pending
    }

    async fn run_fetch(self: Arc<Self>, entry: Arc<Entry>, version: u64) -> FetchOutcome {
        let base = entry.base_currency.as_str();
        let timeout = self.settings.fetch_timeout;
        debug!(base, version, "Fetching rates");

        let fetched = match tokio::time::timeout(
            timeout,
            AssertUnwindSafe(self.fetcher.fetch(base)).catch_unwind(),
        )
        .await
        {
            Err(_) => Err(FetchError::Timeout(timeout)),
            Ok(Err(_)) => Err(FetchError::Network("rate fetcher panicked".to_string())),
            Ok(Ok(result)) => result,
        };
        let outcome = fetched.and_then(|fetched| {
            RateSnapshot::new(base, fetched.rates, fetched.fetched_at, version)
                .map_err(FetchError::from)
        });

        let mut state = entry.state.lock().await;
        if matches!(&state.in_flight, Some((v, _)) if *v == version) {
            state.in_flight = None;
        }

        match outcome {
            Ok(snapshot) => Ok(self.commit(&entry, &mut state, snapshot).await),
            Err(err) => {
                state.failures += 1;
                state.refresh = RefreshState::Failed {
                    last_error: err.clone(),
                    failed_at: self.clock.now(),
                    consecutive_failures: state.failures,
                };
                warn!(
                    base,
                    error = %err,
                    consecutive_failures = state.failures,
                    "Rate refresh failed, keeping last known snapshot"
                );
                Err(err.into())
            }
        }
    }

    async fn commit(
        &self,
        entry: &Entry,
        state: &mut EntryState,
        mut snapshot: RateSnapshot,
    ) -> Arc<RateSnapshot> {
        let base = entry.base_currency.as_str();
        state.failures = 0;
        state.refresh = RefreshState::Idle;

        if let Some(current) = &state.snapshot
            && current.source_version > snapshot.source_version
        {
            debug!(
                base,
                current = current.source_version,
                discarded = snapshot.source_version,
                "Discarding fetch result older than the cached snapshot"
            );
            return Arc::clone(current);
        }

        let mut persisted = self.store.put(&snapshot).await;
        if let Err(StoreError::StaleVersion { stored, .. }) = persisted {
            // The counter was never seeded from this version, e.g. the first load
            // failed. The fetched rates are still the newest data, so move them above it.
            self.versions.fetch_max(stored, Ordering::SeqCst);
            snapshot.source_version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                base,
                stored,
                version = snapshot.source_version,
                "Store holds a higher version, re-stamping fetched rates"
            );
            persisted = self.store.put(&snapshot).await;
        }
        match persisted {
            Ok(()) => state.degraded = false,
            Err(e) => {
                warn!(base, error = %e, "Could not persist snapshot, serving it from memory");
                state.degraded = true;
            }
        }

        let snapshot = Arc::new(snapshot);
        entry.publish(state, Arc::clone(&snapshot));
        info!(
            base,
            version = snapshot.source_version,
            rates = snapshot.rates.len(),
            "Rates refreshed"
        );
        snapshot
    }
}
