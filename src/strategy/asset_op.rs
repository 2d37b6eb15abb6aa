//! Asset operation: sell the most profitable eligible FIFO lot.

use crate::config::StrategyConfig;
use crate::exchange::MarketClient;
use crate::notify::Notifier;
use crate::store::{order_sort_key, LedgerStore, SellRecord};
use crate::strategy::allocation::compute_allocation;
use crate::strategy::data::StrategyData;
use crate::strategy::sizing::{average_fill_price, quantize_sell_quantity, select_sell_candidates};
use anyhow::{Context, Result};
use tracing::{info, warn};

/// Sell the best-ranked open lot, if any survives candidate selection.
///
/// Only the oldest open lot per asset enters selection, so sells walk each
/// asset's lots in FIFO order. Returns the recorded sell, or `None` when no
/// lot was eligible or the order did not fill.
pub async fn run_asset_operation(
    client: &dyn MarketClient,
    store: &dyn LedgerStore,
    notifier: &dyn Notifier,
    cfg: &StrategyConfig,
    data: &StrategyData,
) -> Result<Option<SellRecord>> {
    let view = compute_allocation(data, &cfg.target_wallet)?;

    let mut oldest_lots = Vec::new();
    for asset in cfg.target_wallet.keys() {
        if let Some(lot) = store.oldest_open_lot(asset)? {
            oldest_lots.push(lot);
        }
    }

    let candidates = select_sell_candidates(&oldest_lots, data, &view, &cfg.target_wallet, cfg);
    let Some(best) = candidates.first() else {
        info!("No eligible sell candidate this cycle");
        return Ok(None);
    };

    let filters = data
        .filters(&best.lot.asset)
        .with_context(|| format!("No trading filters for {}", best.lot.asset))?;
    let quantity = quantize_sell_quantity(best.lot.quantity, filters);
    if quantity.is_zero() {
        warn!(
            asset = %best.lot.asset,
            raw = %best.lot.quantity,
            "Lot quantity vanished under LOT_SIZE quantization"
        );
        return Ok(None);
    }

    let order = client
        .place_market_sell(&best.lot.asset, quantity)
        .await
        .with_context(|| format!("Market sell of {} failed", best.lot.asset))?;

    if !order.is_filled() {
        warn!(asset = %best.lot.asset, status = ?order.status, "Sell order not filled");
        return Ok(None);
    }

    let sell = SellRecord {
        asset: best.lot.asset.clone(),
        order_id: order_sort_key(order.transact_time, order.order_id),
        payload: serde_json::to_value(&order).context("Failed to encode order payload")?,
        quantity: order.executed_qty,
        avg_price: average_fill_price(&order),
        lot_order_id: best.lot.order_id.clone(),
    };

    // Order of writes matters: the sell record lands before the lot flips
    // closed, so a crash in between leaves the lot open for a retried sell
    // rather than orphaning proceeds.
    store.put_sell(&sell)?;
    store.close_lot(&best.lot.asset, &best.lot.order_id, &sell.order_id)?;
    store.add_earnings(&best.lot.asset, -order.executed_qty)?;

    info!(
        asset = %sell.asset,
        quantity = %sell.quantity,
        avg_price = %sell.avg_price,
        profit = %best.profit,
        "Closed lot"
    );
    notifier
        .send(&format!(
            "Sold {} {} @ {} {} (bought @ {} {}, {:.2}% realized)",
            sell.quantity,
            sell.asset,
            sell.avg_price,
            data.quote_asset,
            best.lot.avg_price,
            data.quote_asset,
            best.profit * rust_decimal::Decimal::ONE_HUNDRED
        ))
        .await;

    Ok(Some(sell))
}
