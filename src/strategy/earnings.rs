//! Daily earnings snapshot: value the earnings ledger at current prices.

use crate::config::StrategyConfig;
use crate::exchange::MarketClient;
use crate::notify::Notifier;
use crate::store::{EarningsSnapshot, LedgerStore, SnapshotEntry};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::info;

/// Build and persist the snapshot for `now`'s UTC date.
///
/// Re-running on the same date replaces that date's snapshot; `day_change`
/// always compares against the latest snapshot from an earlier date.
pub async fn run_earnings_snapshot(
    client: &dyn MarketClient,
    store: &dyn LedgerStore,
    notifier: &dyn Notifier,
    cfg: &StrategyConfig,
    now: DateTime<Utc>,
) -> Result<EarningsSnapshot> {
    let data = client.get_strategy_data(&cfg.tracked_assets()).await?;
    let earnings = store.earnings()?;
    let date = now.format("%Y-%m-%d").to_string();

    let mut assets = BTreeMap::new();
    let mut total_value = Decimal::ZERO;
    for (asset, quantity) in earnings {
        let price = if asset == data.quote_asset {
            Decimal::ONE
        } else {
            data.price(&asset).unwrap_or_default()
        };
        let value = quantity * price;
        total_value += value;
        assets.insert(asset, SnapshotEntry { quantity, value });
    }

    let previous = store.latest_snapshot_before(&date)?;
    let day_change = match &previous {
        Some(prev) => total_value - prev.total_value,
        None => Decimal::ZERO,
    };

    let snapshot = EarningsSnapshot {
        date,
        assets,
        total_value,
        day_change,
    };
    store.put_snapshot(&snapshot)?;

    info!(
        date = %snapshot.date,
        total_value = %snapshot.total_value,
        day_change = %snapshot.day_change,
        "Recorded earnings snapshot"
    );
    notifier.send(&format_summary(&snapshot, &data.quote_asset)).await;

    Ok(snapshot)
}

fn format_summary(snapshot: &EarningsSnapshot, quote_asset: &str) -> String {
    let mut text = format!(
        "Earnings {}: {} {} ({:+} vs previous)",
        snapshot.date, snapshot.total_value, quote_asset, snapshot.day_change
    );
    for (asset, entry) in &snapshot.assets {
        let _ = write!(text, "\n  {}: {} ({} {})", asset, entry.quantity, entry.value, quote_asset);
    }
    text
}
