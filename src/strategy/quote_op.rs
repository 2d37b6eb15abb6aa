//! Quote operation: deploy quote-asset balance into the most underweight asset.

use crate::config::StrategyConfig;
use crate::exchange::MarketClient;
use crate::notify::Notifier;
use crate::store::{order_sort_key, LedgerStore, Lot};
use crate::strategy::allocation::compute_allocation;
use crate::strategy::data::StrategyData;
use crate::strategy::sizing::{
    effective_min_notional, has_sufficient_quote_balance, order_effective_quantities,
};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// What the quote operation did this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteOutcome {
    /// A buy filled and a new lot was opened.
    Executed {
        asset: String,
        quantity: Decimal,
        funded_by_deposits: bool,
    },
    /// Free quote balance below the effective minimum; nothing placed.
    InsufficientBalance,
    /// The order came back without a complete fill; no lot recorded.
    NotFilled { asset: String },
}

/// Buy one effective-minimum-notional slice of the most underweight asset
/// (or of `forced_asset` when the caller has already chosen).
pub async fn run_quote_operation(
    client: &dyn MarketClient,
    store: &dyn LedgerStore,
    notifier: &dyn Notifier,
    cfg: &StrategyConfig,
    data: &StrategyData,
    forced_asset: Option<&str>,
) -> Result<QuoteOutcome> {
    if !has_sufficient_quote_balance(data, cfg.min_notional_multiplier) {
        info!(
            balance = %data.quote_balance(),
            "Quote balance below effective minimum, skipping buy"
        );
        return Ok(QuoteOutcome::InsufficientBalance);
    }

    let asset = match forced_asset {
        Some(asset) => asset.to_string(),
        None => compute_allocation(data, &cfg.target_wallet)?.lowest,
    };
    let quote_amount = effective_min_notional(data, cfg.min_notional_multiplier);

    // Decided before the order so a fill is attributed consistently even if
    // another deposit lands mid-flight.
    let funded_by_deposits = store.deposits()?.available() >= quote_amount;

    let order = client
        .place_market_buy(&asset, quote_amount)
        .await
        .with_context(|| format!("Market buy of {} failed", asset))?;

    if !order.is_filled() {
        warn!(%asset, status = ?order.status, "Buy order not filled");
        return Ok(QuoteOutcome::NotFilled { asset });
    }

    let (quantity, avg_price) = order_effective_quantities(&order, cfg.trade_fee);
    let lot = Lot {
        asset: asset.clone(),
        order_id: order_sort_key(order.transact_time, order.order_id),
        payload: serde_json::to_value(&order).context("Failed to encode order payload")?,
        quantity,
        avg_price,
        deposits_funded: funded_by_deposits,
        open: true,
        closed_by: None,
    };
    store.put_lot(&lot)?;

    if funded_by_deposits {
        store.add_deposits_used(order.cummulative_quote_qty)?;
    } else {
        store.add_earnings(&asset, quantity)?;
    }

    info!(%asset, %quantity, %avg_price, funded_by_deposits, "Opened lot");
    let funding = if funded_by_deposits {
        "deposits"
    } else {
        "earnings"
    };
    notifier
        .send(&format!(
            "Bought {} {} @ {} {} (spent {} {} from {})",
            quantity,
            asset,
            avg_price,
            data.quote_asset,
            order.cummulative_quote_qty,
            data.quote_asset,
            funding
        ))
        .await;

    Ok(QuoteOutcome::Executed {
        asset,
        quantity,
        funded_by_deposits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::OrderSide;
    use crate::exchange::MockSpotClient;
    use crate::notify::{NullNotifier, RecordingNotifier};
    use crate::store::MemoryLedger;
    use crate::strategy::data::SymbolFilters;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn snapshot(quote: Decimal, values: &[(&str, Decimal, Decimal)]) -> StrategyData {
        let tracked: Vec<String> = values.iter().map(|(a, _, _)| a.to_string()).collect();
        let balances: BTreeMap<String, Decimal> = values
            .iter()
            .map(|(a, q, _)| (a.to_string(), *q))
            .chain(std::iter::once(("USDT".to_string(), quote)))
            .collect();
        let prices: BTreeMap<String, Decimal> = values
            .iter()
            .map(|(a, _, p)| (a.to_string(), *p))
            .collect();
        let filters: BTreeMap<String, SymbolFilters> = tracked
            .iter()
            .map(|a| {
                (
                    a.clone(),
                    SymbolFilters {
                        step_size: dec!(0.00001),
                        min_qty: dec!(0.00001),
                        min_notional: dec!(10),
                    },
                )
            })
            .collect();
        StrategyData::assemble("USDT", &tracked, &balances, &prices, &filters)
    }

    fn cfg(targets: &[(&str, Decimal)]) -> StrategyConfig {
        StrategyConfig {
            target_wallet: targets
                .iter()
                .map(|(a, w)| (a.to_string(), *w))
                .collect(),
            ..StrategyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_insufficient_balance_places_no_order() {
        let data = snapshot(dec!(14), &[("BTC", dec!(1), dec!(100))]);
        let cfg_ = cfg(&[("BTC", dec!(1))]);
        let client = MockSpotClient::new(data.clone());
        let store = MemoryLedger::new();

        let outcome =
            run_quote_operation(&client, &store, &NullNotifier, &cfg_, &data, None)
                .await
                .unwrap();

        assert_eq!(outcome, QuoteOutcome::InsufficientBalance);
        assert!(client.orders().await.is_empty());
        assert!(store.lots().is_empty());
    }

    #[tokio::test]
    async fn test_buys_most_underweight_asset() {
        // ETH holds far less of its target share than BTC.
        let data = snapshot(
            dec!(100),
            &[("BTC", dec!(10), dec!(100)), ("ETH", dec!(1), dec!(100))],
        );
        let cfg_ = cfg(&[("BTC", dec!(1)), ("ETH", dec!(1))]);
        let client = MockSpotClient::new(data.clone());
        let store = MemoryLedger::new();

        let outcome =
            run_quote_operation(&client, &store, &NullNotifier, &cfg_, &data, None)
                .await
                .unwrap();

        match outcome {
            QuoteOutcome::Executed { asset, .. } => assert_eq!(asset, "ETH"),

            other => panic!("unexpected outcome: {:?}", other),
        }

        let orders = client.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].asset, "ETH");
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].amount, dec!(15));

        let lots = store.lots();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].asset, "ETH");
        assert!(lots[0].open);
        // 0.15 gross, 0.1% buy fee.
        assert_eq!(lots[0].quantity, dec!(0.14985));
    }

    #[tokio::test]
    async fn test_forced_asset_overrides_allocation() {
        let data = snapshot(
            dec!(100),
            &[("BTC", dec!(10), dec!(100)), ("ETH", dec!(1), dec!(100))],
        );
        let cfg_ = cfg(&[("BTC", dec!(1)), ("ETH", dec!(1))]);
        let client = MockSpotClient::new(data.clone());
        let store = MemoryLedger::new();

        let outcome =
            run_quote_operation(&client, &store, &NullNotifier, &cfg_, &data, Some("BTC"))
                .await
                .unwrap();

        match outcome {
            QuoteOutcome::Executed { asset, .. } => assert_eq!(asset, "BTC"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notification_names_the_funding_source() {
        let data = snapshot(dec!(100), &[("BTC", dec!(1), dec!(100))]);
        let cfg_ = cfg(&[("BTC", dec!(1))]);

        let client = MockSpotClient::new(data.clone());
        let store = MemoryLedger::new().with_deposits(dec!(50), dec!(0));
        let notifier = RecordingNotifier::new();
        run_quote_operation(&client, &store, &notifier, &cfg_, &data, None)
            .await
            .unwrap();
        let messages = notifier.messages().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("from deposits"), "{}", messages[0]);

        let client = MockSpotClient::new(data.clone());
        let store = MemoryLedger::new();
        let notifier = RecordingNotifier::new();
        run_quote_operation(&client, &store, &notifier, &cfg_, &data, None)
            .await
            .unwrap();
        let messages = notifier.messages().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("from earnings"), "{}", messages[0]);
    }

    #[tokio::test]
    async fn test_deposit_funded_buy_consumes_deposits_not_earnings() {
        let data = snapshot(dec!(100), &[("BTC", dec!(1), dec!(100))]);
        let cfg_ = cfg(&[("BTC", dec!(1))]);
        let client = MockSpotClient::new(data.clone());
        let store = MemoryLedger::new().with_deposits(dec!(50), dec!(0));

        let outcome =
            run_quote_operation(&client, &store, &NullNotifier, &cfg_, &data, None)
                .await
                .unwrap();

        match outcome {
            QuoteOutcome::Executed {
                funded_by_deposits, ..
            } => assert!(funded_by_deposits),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let deposits = store.deposits().unwrap();
        assert_eq!(deposits.used, dec!(15));
        assert!(store.earnings().unwrap().is_empty());
        assert!(store.lots()[0].deposits_funded);
    }

    #[tokio::test]
    async fn test_self_funded_buy_credits_earnings() {
        let data = snapshot(dec!(100), &[("BTC", dec!(1), dec!(100))]);
        let cfg_ = cfg(&[("BTC", dec!(1))]);
        let client = MockSpotClient::new(data.clone());
        let store = MemoryLedger::new();

        run_quote_operation(&client, &store, &NullNotifier, &cfg_, &data, None)
            .await
            .unwrap();

        let earnings = store.earnings().unwrap();
        assert_eq!(earnings.get("BTC").copied(), Some(dec!(0.14985)));
        assert_eq!(store.deposits().unwrap().used, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unfilled_order_records_nothing() {
        let data = snapshot(dec!(100), &[("BTC", dec!(1), dec!(100))]);
        let cfg_ = cfg(&[("BTC", dec!(1))]);
        let client = MockSpotClient::rejecting(data.clone());
        let store = MemoryLedger::new();

        let outcome =
            run_quote_operation(&client, &store, &NullNotifier, &cfg_, &data, None)
                .await
                .unwrap();

        assert_eq!(
            outcome,
            QuoteOutcome::NotFilled {
                asset: "BTC".to_string()
            }
        );
        assert!(store.lots().is_empty());
        assert!(store.earnings().unwrap().is_empty());
    }
}
