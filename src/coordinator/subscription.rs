use futures::Stream;
use std::sync::Arc;
use tokio::sync::watch;

use crate::core::RateSnapshot;

/// A live view of one base currency's snapshots.
///
/// The first item is the latest known snapshot (if any), followed by every later
/// update. A consumer that falls behind sees the most recent snapshot rather than
/// each intermediate one. Dropping the subscription unsubscribes.
pub struct Subscription {
    base_currency: String,
    rx: watch::Receiver<Option<Arc<RateSnapshot>>>,
    primed: bool,
}

impl Subscription {
    pub(crate) fn new(base_currency: String, rx: watch::Receiver<Option<Arc<RateSnapshot>>>) -> Self {
        Self {
            base_currency,
            rx,
            primed: false,
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Waits for the next snapshot. Returns `None` once the cache has been dropped.
    pub async fn next(&mut self) -> Option<Arc<RateSnapshot>> {
        if !self.primed {
            self.primed = true;
            if let Some(current) = self.rx.borrow_and_update().clone() {
                return Some(current);
            }
        }
        loop {
            self.rx.changed().await.ok()?;
            if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<RateSnapshot>> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|snapshot| (snapshot, sub))
        })
    }
}
