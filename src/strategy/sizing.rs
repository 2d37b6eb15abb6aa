//! Order sizing, profitability, and sell-candidate selection.

use crate::config::StrategyConfig;
use crate::exchange::types::OrderResponse;
use crate::store::Lot;
use crate::strategy::allocation::AllocationView;
use crate::strategy::data::{StrategyData, SymbolFilters, TargetWallet};
use rust_decimal::Decimal;

/// Smallest order notional the strategy will place: the exchange minimum
/// padded by a multiplier so a filled order never lands right on the limit.
pub fn effective_min_notional(data: &StrategyData, multiplier: Decimal) -> Decimal {
    data.min_notional * multiplier
}

/// Whether the free quote balance covers one effective-minimum buy.
pub fn has_sufficient_quote_balance(data: &StrategyData, multiplier: Decimal) -> bool {
    data.quote_balance() >= effective_min_notional(data, multiplier)
}

/// Round-trip profit ratio of a lot at the current price.
///
/// Both the buy and the eventual sell pay `trade_fee`, so the break-even
/// point sits above the entry price.
pub fn lot_profit(lot: &Lot, data: &StrategyData, trade_fee: Decimal) -> Decimal {
    let price = data.price(&lot.asset).unwrap_or_default();
    if lot.avg_price.is_zero() {
        return Decimal::ZERO;
    }
    let fee_keep = Decimal::ONE - trade_fee;
    (price / lot.avg_price) * fee_keep * fee_keep - Decimal::ONE
}

/// Truncate a sell quantity to the LOT_SIZE step grid.
///
/// Returns zero when the truncated quantity falls below the exchange
/// minimum; callers treat zero as "cannot sell".
pub fn quantize_sell_quantity(quantity: Decimal, filters: &SymbolFilters) -> Decimal {
    if filters.step_size.is_zero() {
        return quantity;
    }
    let places = filters.step_size.normalize().scale();
    let truncated = quantity.trunc_with_scale(places);
    if truncated < filters.min_qty {
        Decimal::ZERO
    } else {
        truncated
    }
}

/// Quantity-weighted average fill price, `0` when there are no fills.
pub fn average_fill_price(order: &OrderResponse) -> Decimal {
    let total_qty: Decimal = order.fills.iter().map(|f| f.qty).sum();
    if total_qty.is_zero() {
        return Decimal::ZERO;
    }
    let total_quote: Decimal = order.fills.iter().map(|f| f.price * f.qty).sum();
    total_quote / total_qty
}

/// Net quantity actually credited after fees, plus the average fill price.
///
/// Market buys pay commission in the bought asset, so the credited quantity
/// is the fill sum shrunk by the fee rate.
pub fn order_effective_quantities(order: &OrderResponse, trade_fee: Decimal) -> (Decimal, Decimal) {
    let gross_qty: Decimal = order.fills.iter().map(|f| f.qty).sum();
    let net_qty = gross_qty * (Decimal::ONE - trade_fee);
    (net_qty, average_fill_price(order))
}

/// Allocation view after hypothetically moving `amount` of quote value
/// from `from` to `to`. Used to veto sells that would flip the seller
/// into the most-underweight slot.
pub fn project_transfer(
    data: &StrategyData,
    target: &TargetWallet,
    from: &str,
    to: &str,
    amount: Decimal,
) -> Option<String> {
    let mut projected = data.clone();
    if let Some(state) = projected.assets.get_mut(from) {
        state.total_value -= amount;
    }
    if let Some(state) = projected.assets.get_mut(to) {
        state.total_value += amount;
    }
    crate::strategy::allocation::compute_allocation(&projected, target)
        .ok()
        .map(|v| v.lowest)
}

/// An open lot annotated with the figures candidate selection ranks by.
#[derive(Debug, Clone)]
pub struct RankedLot {
    pub lot: Lot,
    pub profit: Decimal,
    pub z_score: f64,
}

/// Filter and rank open lots into sell candidates, best first.
///
/// A lot survives when its asset is not allocation-protected, it is either
/// profitable enough or statistically overweight, the position is large
/// enough to trade, and selling it would not make its asset the new
/// most-underweight one.
pub fn select_sell_candidates(
    open_lots: &[Lot],
    data: &StrategyData,
    view: &AllocationView,
    target: &TargetWallet,
    cfg: &StrategyConfig,
) -> Vec<RankedLot> {
    let protected: Vec<&String> = view
        .sorted_ascending
        .iter()
        .take(cfg.exclude_lowest_count)
        .collect();
    let min_notional = effective_min_notional(data, cfg.min_notional_multiplier);
    let size_floor = Decimal::from(cfg.min_trade_size_multiplier) * min_notional;
    let projection_amount = cfg.projection_multiplier * data.min_notional;

    let mut candidates: Vec<RankedLot> = open_lots
        .iter()
        .filter(|lot| !protected.iter().any(|p| **p == lot.asset))
        .map(|lot| RankedLot {
            lot: lot.clone(),
            profit: lot_profit(lot, data, cfg.trade_fee),
            z_score: view.z_score.get(&lot.asset).copied().unwrap_or(0.0),
        })
        .filter(|ranked| {
            ranked.profit > cfg.min_profit || ranked.z_score > cfg.z_score_threshold
        })
        .filter(|ranked| data.total_value(&ranked.lot.asset) > size_floor)
        .filter(|ranked| {
            let projected_lowest = project_transfer(
                data,
                target,
                &ranked.lot.asset,
                &view.lowest,
                projection_amount,
            );
            projected_lowest.as_deref() != Some(ranked.lot.asset.as_str())
        })
        .collect();

    candidates.sort_by(|a, b| b.profit.cmp(&a.profit));
    candidates
}
