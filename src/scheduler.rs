//! Background refresh of tracked base currencies.
//!
//! Each tracked base currency keeps its own due time and backoff, and refreshes run
//! as separate tasks, so a slow or failing currency never holds up the others.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::coordinator::RateCache;
use crate::core::config::{SchedulerSettings, minutes};
use crate::core::{CacheError, normalize_code};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between successful refreshes of the same base.
    pub interval: Duration,
    /// Delay after the first failure; doubled for each further consecutive failure.
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub recent_read_window: Duration,
    /// Refreshed whether or not anyone reads them.
    pub pinned: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerSettings::default().into()
    }
}

impl From<SchedulerSettings> for SchedulerConfig {
    fn from(settings: SchedulerSettings) -> Self {
        Self {
            interval: minutes(settings.interval_mins),
            retry_base: Duration::from_secs(settings.retry_base_secs),
            retry_max: Duration::from_secs(settings.retry_max_secs),
            recent_read_window: minutes(settings.recent_read_window_mins),
            pinned: settings.currencies,
        }
    }
}

/// Shortest interval or retry delay the scheduler will use.
const MIN_DELAY: Duration = Duration::from_secs(1);

impl SchedulerConfig {
    /// Raises zero delays to [`MIN_DELAY`] and the retry cap to at least the retry
    /// base, so the loop can never re-fetch back to back.
    fn sanitized(mut self) -> Self {
        if self.interval < MIN_DELAY {
            warn!(interval = ?self.interval, min = ?MIN_DELAY, "Refresh interval too short");
            self.interval = MIN_DELAY;
        }
        if self.retry_base < MIN_DELAY {
            warn!(retry_base = ?self.retry_base, min = ?MIN_DELAY, "Retry base too short");
            self.retry_base = MIN_DELAY;
        }
        if self.retry_max < self.retry_base {
            warn!(
                retry_base = ?self.retry_base,
                retry_max = ?self.retry_max,
                "Retry cap below retry base, raising it"
            );
            self.retry_max = self.retry_base;
        }
        self
    }
}

/// Exponential backoff over consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Records a failure and returns the delay before the next attempt:
    /// `base * 2^(n-1)` for the n-th consecutive failure, capped at `max`.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exponent = (self.failures - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

struct Slot {
    next_due: Instant,
    running: bool,
    backoff: Backoff,
}

pub struct RefreshScheduler {
    cache: RateCache,
    config: SchedulerConfig,
}

/// Handle to a running scheduler. Dropping the handle also stops the scheduler, but
/// without waiting for it.
pub struct SchedulerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops scheduling further refreshes. Refreshes already started still complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Refresh scheduler task ended abnormally");
        }
    }
}

impl RefreshScheduler {
    pub fn new(cache: RateCache, config: SchedulerConfig) -> Self {
        Self {
            cache,
            config: config.sanitized(),
        }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn tracked(&self) -> Vec<String> {
        let mut tracked = self
            .cache
            .tracked_currencies(self.config.recent_read_window)
            .await;
        for code in &self.config.pinned {
            match normalize_code(code) {
                Ok(code) => tracked.push(code),
                Err(e) => warn!(error = %e, "Ignoring pinned currency"),
            }
        }
        tracked.sort();
        tracked.dedup();
        tracked
    }

    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(String, Result<(), CacheError>)>();
        let mut slots: HashMap<String, Slot> = HashMap::new();
        info!(
            interval = ?self.config.interval,
            pinned = ?self.config.pinned,
            "Refresh scheduler started"
        );

        loop {
            let now = Instant::now();
            let tracked = self.tracked().await;
            slots.retain(|base, slot| slot.running || tracked.contains(base));
            for base in tracked {
                slots.entry(base).or_insert_with(|| Slot {
                    next_due: now,
                    running: false,
                    backoff: Backoff::new(self.config.retry_base, self.config.retry_max),
                });
            }

            for (base, slot) in slots.iter_mut() {
                if slot.running || slot.next_due > now {
                    continue;
                }
                slot.running = true;
                debug!(base = %base, "Scheduled refresh");
                let cache = self.cache.clone();
                let done_tx = done_tx.clone();
                let base = base.clone();
                tokio::spawn(async move {
                    let outcome = cache.refresh(&base).await.map(|_| ());
                    let _ = done_tx.send((base, outcome));
                });
            }

            // Wake for the earliest due base, and at least once per interval to pick
            // up newly tracked ones.
            let wake = slots
                .values()
                .filter(|slot| !slot.running)
                .map(|slot| slot.next_due)
                .min()
                .unwrap_or(now + self.config.interval)
                .min(now + self.config.interval);

            tokio::select! {
                _ = &mut shutdown_rx => break,
                Some((base, outcome)) = done_rx.recv() => {
                    let finished = Instant::now();
                    if let Some(slot) = slots.get_mut(&base) {
                        slot.running = false;
                        match outcome {
                            Ok(()) => {
                                slot.backoff.reset();
                                slot.next_due = finished + self.config.interval;
                            }
                            Err(e) => {
                                let delay = slot.backoff.record_failure();
                                slot.next_due = finished + delay;
                                warn!(
                                    base = %base,
                                    error = %e,
                                    failures = slot.backoff.failures(),
                                    retry_in = ?delay,
                                    "Scheduled refresh failed"
                                );
                            }
                        }
                    }
                }
                _ = sleep_until(wake) => {}
            }
        }

        info!("Refresh scheduler stopped");
    }
}
