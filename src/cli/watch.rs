use anyhow::{Context, Result};
use futures::StreamExt;
use futures::stream::{BoxStream, select_all};
use std::future::Future;
use std::sync::Arc;

use super::ui;
use crate::coordinator::RateCache;
use crate::core::{RateSnapshot, normalize_code};
use crate::scheduler::{RefreshScheduler, SchedulerConfig};

/// Runs the refresh scheduler and prints every snapshot update for `bases` until
/// Ctrl-C. With no `bases`, the configured currencies are watched.
pub async fn run(cache: &RateCache, config: SchedulerConfig, bases: &[String]) -> Result<()> {
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    watch(cache, config, bases, stop, |snapshot| {
        println!("{}", format_update(snapshot, cache));
    })
    .await
}

/// Keeps the watched bases refreshed and hands each update to `on_update` until
/// `stop` resolves.
pub async fn watch(
    cache: &RateCache,
    mut config: SchedulerConfig,
    bases: &[String],
    stop: impl Future<Output = ()>,
    mut on_update: impl FnMut(&RateSnapshot),
) -> Result<()> {
    let bases = if bases.is_empty() {
        config.pinned.clone()
    } else {
        bases.to_vec()
    };
    let mut watched = Vec::with_capacity(bases.len());
    for base in &bases {
        watched.push(normalize_code(base).with_context(|| format!("Cannot watch {base}"))?);
    }
    config.pinned.extend(watched.iter().cloned());

    let mut streams: Vec<BoxStream<'static, Arc<RateSnapshot>>> = Vec::new();
    for base in &watched {
        streams.push(cache.subscribe(base).await?.into_stream().boxed());
    }
    let mut updates = select_all(streams);

    let scheduler = RefreshScheduler::new(cache.clone(), config).spawn();
    println!(
        "{}",
        ui::style_text(
            &format!("Watching {} (Ctrl-C to stop)", watched.join(", ")),
            ui::StyleType::Subtle
        )
    );

    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            update = updates.next() => match update {
                Some(snapshot) => on_update(&snapshot),
                None => break,
            },
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

fn format_update(snapshot: &RateSnapshot, cache: &RateCache) -> String {
    let preview = snapshot
        .rates
        .iter()
        .filter(|(code, _)| **code != snapshot.base_currency)
        .take(4)
        .map(|(code, rate)| format!("{code} {}", ui::format_rate(*rate)))
        .collect::<Vec<_>>()
        .join("  ");
    format!(
        "{} {} v{} {}  {}",
        ui::style_text(
            &snapshot.fetched_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ui::StyleType::Subtle
        ),
        ui::style_text(&snapshot.base_currency, ui::StyleType::Title),
        snapshot.source_version,
        cache.staleness_of(Some(snapshot)),
        preview
    )
}
