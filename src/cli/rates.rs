use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::Cell;
use std::sync::Arc;

use super::ui;
use crate::coordinator::RateCache;
use crate::core::{RateSnapshot, Staleness};

/// Prints the cached rates for `base`, fetching them first if nothing is cached.
pub async fn get(cache: &RateCache, base: &str, targets: &[String]) -> Result<()> {
    let spinner = ui::new_spinner(&format!("Loading {} rates", base.to_uppercase()));
    let snapshot = cache.read(base).await;
    spinner.finish_and_clear();
    let snapshot = snapshot.with_context(|| format!("Failed to load rates for {base}"))?;

    print_snapshot(cache, &snapshot, targets).await
}

/// Fetches `base` from the rate source regardless of the cached snapshot's age.
pub async fn refresh(cache: &RateCache, base: &str) -> Result<()> {
    let spinner = ui::new_spinner(&format!("Refreshing {} rates", base.to_uppercase()));
    let snapshot = cache.refresh(base).await;
    spinner.finish_and_clear();
    let snapshot = snapshot.with_context(|| format!("Failed to refresh rates for {base}"))?;

    print_snapshot(cache, &snapshot, &[]).await
}

async fn print_snapshot(
    cache: &RateCache,
    snapshot: &Arc<RateSnapshot>,
    targets: &[String],
) -> Result<()> {
    let staleness = cache.staleness_of(Some(snapshot.as_ref()));
    let degraded = cache.is_degraded(&snapshot.base_currency).await?;
    println!(
        "{}",
        render_snapshot(snapshot, targets, staleness, degraded, cache.now())
    );
    Ok(())
}

/// Renders a snapshot as a header line plus a table of rates. With no `targets`,
/// every rate in the snapshot is listed.
pub fn render_snapshot(
    snapshot: &RateSnapshot,
    targets: &[String],
    staleness: Staleness,
    degraded: bool,
    now: DateTime<Utc>,
) -> String {
    let mut out = format!(
        "\n{} {} (fetched {} ago, version {})\n",
        ui::style_text(&format!("Rates for {}", snapshot.base_currency), ui::StyleType::Title),
        match staleness {
            Staleness::Fresh => ui::style_text("fresh", ui::StyleType::Value),
            other => ui::style_text(&other.to_string(), ui::StyleType::Warning),
        },
        ui::format_age(snapshot.fetched_at, now),
        snapshot.source_version,
    );
    if degraded {
        out.push_str(&ui::style_text(
            "Warning: rates could not be saved and are held in memory only\n",
            ui::StyleType::Warning,
        ));
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Currency"), ui::header_cell("Rate")]);

    if targets.is_empty() {
        for (code, rate) in &snapshot.rates {
            table.add_row(vec![Cell::new(code), ui::rate_cell(Some(*rate))]);
        }
    } else {
        for target in targets {
            table.add_row(vec![
                Cell::new(target.trim().to_uppercase()),
                ui::rate_cell(snapshot.rate(target)),
            ]);
        }
    }

    out.push_str(&table.to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> RateSnapshot {
        let fetched_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        RateSnapshot::new(
            "USD",
            [("EUR".to_string(), 0.92), ("JPY".to_string(), 150.12)],
            fetched_at,
            7,
        )
        .unwrap()
    }

    #[test]
    fn test_render_all_rates() {
        let snapshot = snapshot();
        let now = snapshot.fetched_at + chrono::Duration::minutes(5);
        let out = render_snapshot(&snapshot, &[], Staleness::Fresh, false, now);

        assert!(out.contains("Rates for USD"));
        assert!(out.contains("5m ago"));
        assert!(out.contains("version 7"));
        assert!(out.contains("EUR"));
        assert!(out.contains("0.920000"));
        assert!(out.contains("150.12"));
        assert!(!out.contains("memory only"));
    }

    #[test]
    fn test_render_selected_targets() {
        let snapshot = snapshot();
        let targets = vec!["eur".to_string(), "usd".to_string(), "CHF".to_string()];
        let out = render_snapshot(&snapshot, &targets, Staleness::Stale, true, snapshot.fetched_at);

        assert!(out.contains("stale"));
        assert!(out.contains("memory only"));
        assert!(out.contains("1.0000"));
        assert!(out.contains("CHF"));
        assert!(out.contains("N/A"));
        assert!(!out.contains("JPY"));
    }
}
