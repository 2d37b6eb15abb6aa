//! Narrow interface the strategy consumes for market and account access.

use crate::exchange::types::OrderResponse;
use crate::strategy::StrategyData;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Market/account collaborator contract.
///
/// The strategy core only ever needs a fresh snapshot and two market-order
/// primitives; everything else the exchange offers stays behind this seam.
#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Build a fresh `StrategyData` snapshot for the tracked base assets.
    async fn get_strategy_data(&self, assets: &[String]) -> anyhow::Result<StrategyData>;

    /// Place a market buy denominated in the quote asset.
    async fn place_market_buy(
        &self,
        asset: &str,
        quote_amount: Decimal,
    ) -> anyhow::Result<OrderResponse>;

    /// Place a market sell for a base-asset quantity.
    async fn place_market_sell(
        &self,
        asset: &str,
        quantity: Decimal,
    ) -> anyhow::Result<OrderResponse>;
}
