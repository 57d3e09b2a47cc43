//! Staleness classification for cached snapshots

use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::time::Duration;

use super::snapshot::RateSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Young enough to serve without refreshing.
    Fresh,
    /// Still served, but a refresh should be dispatched.
    Stale,
    /// Nothing cached for this base currency.
    Absent,
}

impl Display for Staleness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Staleness::Fresh => "fresh",
                Staleness::Stale => "stale",
                Staleness::Absent => "absent",
            }
        )
    }
}

/// Classifies a snapshot against `max_age`.
///
/// A snapshot is stale once `now - fetched_at` exceeds `max_age`. Snapshots stamped
/// in the future count as fresh.
pub fn classify(
    snapshot: Option<&RateSnapshot>,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Staleness {
    let Some(snapshot) = snapshot else {
        return Staleness::Absent;
    };
    match snapshot.age(now).to_std() {
        Ok(age) if age > max_age => Staleness::Stale,
        _ => Staleness::Fresh,
    }
}
