//! One rebalancing cycle: buy if possible, otherwise sell then re-buy.

use crate::config::StrategyConfig;
use crate::exchange::MarketClient;
use crate::notify::Notifier;
use crate::store::LedgerStore;
use crate::strategy::allocation::compute_allocation;
use crate::strategy::asset_op::run_asset_operation;
use crate::strategy::quote_op::{run_quote_operation, QuoteOutcome};
use anyhow::Result;
use tracing::{debug, info};

/// Net effect of one strategy cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Free quote balance covered a buy directly.
    Bought { asset: String },
    /// A sell freed balance and the follow-up buy filled.
    SoldAndBought { sold: String, bought: String },
    /// A sell went through but the follow-up buy did not.
    Sold { asset: String },
    /// Nothing tradable this cycle.
    Idle,
}

/// Run one full cycle.
///
/// The most underweight asset is pinned before the sell executes; the
/// follow-up buy targets that pre-sale reading rather than whatever the
/// sell itself made most underweight.
pub async fn run_cycle(
    client: &dyn MarketClient,
    store: &dyn LedgerStore,
    notifier: &dyn Notifier,
    cfg: &StrategyConfig,
) -> Result<CycleOutcome> {
    let tracked = cfg.tracked_assets();
    let data = client.get_strategy_data(&tracked).await?;

    match run_quote_operation(client, store, notifier, cfg, &data, None).await? {
        QuoteOutcome::Executed { asset, .. } => {
            return Ok(CycleOutcome::Bought { asset });
        }
        QuoteOutcome::NotFilled { asset } => {
            debug!(%asset, "Opening buy unfilled, falling through to sell");
        }
        QuoteOutcome::InsufficientBalance => {}
    }

    let pre_sale_lowest = compute_allocation(&data, &cfg.target_wallet)?.lowest;

    let Some(sell) = run_asset_operation(client, store, notifier, cfg, &data).await? else {
        return Ok(CycleOutcome::Idle);
    };
    let sold = sell.asset;

    // Balances moved; re-snapshot before spending the proceeds.
    let data = client.get_strategy_data(&tracked).await?;
    let outcome = run_quote_operation(
        client,
        store,
        notifier,
        cfg,
        &data,
        Some(&pre_sale_lowest),
    )
    .await?;

    match outcome {
        QuoteOutcome::Executed { asset, .. } => {
            info!(%sold, bought = %asset, "Cycle rotated value");
            Ok(CycleOutcome::SoldAndBought {
                sold,
                bought: asset,
            })
        }
        _ => Ok(CycleOutcome::Sold { asset: sold }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::OrderSide;
    use crate::exchange::MockSpotClient;
    use crate::notify::NullNotifier;
    use crate::store::{order_sort_key, Lot, MemoryLedger};
    use crate::strategy::data::{StrategyData, SymbolFilters};
    use rust_decimal::Decimal;
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

    fn lot(asset: &str, quantity: Decimal, avg_price: Decimal) -> Lot {
        Lot {
            asset: asset.to_string(),
            order_id: order_sort_key(1_000, 1),
            payload: serde_json::Value::Null,
            quantity,
            avg_price,
            deposits_funded: false,
            open: true,
            closed_by: None,
        }
    }

    #[tokio::test]
    async fn test_cycle_buys_when_balance_allows() {
        let data = snapshot(
            dec!(100),
            &[("BTC", dec!(10), dec!(100)), ("ETH", dec!(1), dec!(100))],
        );
        let cfg_ = cfg(&[("BTC", dec!(1)), ("ETH", dec!(1))]);
        let client = MockSpotClient::new(data);
        let store = MemoryLedger::new();

        let outcome = run_cycle(&client, &store, &NullNotifier, &cfg_)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Bought {
                asset: "ETH".to_string()
            }
        );
        assert_eq!(client.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_idles_with_no_balance_and_no_candidate() {
        let data = snapshot(
            dec!(0),
            &[("BTC", dec!(10), dec!(100)), ("ETH", dec!(10), dec!(100))],
        );
        let cfg_ = cfg(&[("BTC", dec!(1)), ("ETH", dec!(1))]);
        let client = MockSpotClient::new(data);
        let store = MemoryLedger::new();

        let outcome = run_cycle(&client, &store, &NullNotifier, &cfg_)
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Idle);
        assert!(client.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_sells_then_buys_pre_sale_lowest() {
        // BNB is the most underweight before the sell; the ETH sell dumps
        // proceeds into quote balance, and the follow-up buy must still
        // target BNB even though the balance shift changes the allocation.
        let data = snapshot(
            dec!(0),
            &[
                ("BTC", dec!(10), dec!(100)),
                ("ETH", dec!(10), dec!(150)),
                ("BNB", dec!(5), dec!(100)),
            ],
        );
        let cfg_ = cfg(&[("BTC", dec!(1)), ("ETH", dec!(1)), ("BNB", dec!(1))]);
        let client = MockSpotClient::new(data);
        let store = MemoryLedger::new();
        store.put_lot(&lot("ETH", dec!(0.5), dec!(100))).unwrap();

        // The refresh after the sell sees the proceeds in quote balance.
        // That snapshot has BTC most underweight, but the follow-up buy
        // must still use the pre-sale reading (BNB).
        let refreshed = snapshot(
            dec!(75),
            &[
                ("BTC", dec!(1), dec!(100)),
                ("ETH", dec!(9.5), dec!(150)),
                ("BNB", dec!(5), dec!(100)),
            ],
        );
        client.queue_data(refreshed).await;

        let outcome = run_cycle(&client, &store, &NullNotifier, &cfg_)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::SoldAndBought {
                sold: "ETH".to_string(),
                bought: "BNB".to_string()
            }
        );

        let orders = client.orders().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].asset, "ETH");
        assert_eq!(orders[1].side, OrderSide::Buy);
        assert_eq!(orders[1].asset, "BNB");
    }
}
