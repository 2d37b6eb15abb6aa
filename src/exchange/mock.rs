//! In-memory exchange client for tests.

use crate::exchange::traits::MarketClient;
use crate::exchange::types::{Fill, OrderResponse, OrderSide, OrderStatus};
use crate::strategy::StrategyData;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

/// Record of an order placed against the mock.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub asset: String,
    pub side: OrderSide,
    /// Quote amount for buys, base quantity for sells.
    pub amount: Decimal,
}

struct MockState {
    data: StrategyData,
    queued: Vec<StrategyData>,
    orders: Vec<PlacedOrder>,
    next_order_id: u64,
    next_transact_time: i64,
}

/// Mock spot client backed by a fixed [`StrategyData`] snapshot.
///
/// Orders fill completely at the snapshot price unless `fill_orders`
/// is disabled, in which case they come back EXPIRED with no fills.
pub struct MockSpotClient {
    state: Mutex<MockState>,
    fill_orders: bool,
    trade_fee: Decimal,
}

impl MockSpotClient {
    pub fn new(data: StrategyData) -> Self {
        Self {
            state: Mutex::new(MockState {
                data,
                queued: Vec::new(),
                orders: Vec::new(),
                next_order_id: 1000,
                next_transact_time: 1_700_000_000_000,
            }),
            fill_orders: true,
            trade_fee: Decimal::new(1, 3),
        }
    }

    /// Orders come back unfilled instead of executing.
    pub fn rejecting(data: StrategyData) -> Self {
        Self {
            fill_orders: false,
            ..Self::new(data)
        }
    }

    /// Queue a snapshot to become current after the next fetch, so
    /// consecutive fetches within one cycle can observe state moving.
    pub async fn queue_data(&self, data: StrategyData) {
        self.state.lock().await.queued.push(data);
    }

    /// Orders placed so far, in order.
    pub async fn orders(&self) -> Vec<PlacedOrder> {
        self.state.lock().await.orders.clone()
    }

    fn synthesize(
        state: &mut MockState,
        asset: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
        filled: bool,
    ) -> OrderResponse {
        let order_id = state.next_order_id;
        let transact_time = state.next_transact_time;
        state.next_order_id += 1;
        state.next_transact_time += 1000;

        let symbol = format!("{}{}", asset, state.data.quote_asset);

        if !filled {
            return OrderResponse {
                symbol,
                order_id,
                transact_time,
                executed_qty: Decimal::ZERO,
                cummulative_quote_qty: Decimal::ZERO,
                status: OrderStatus::Expired,
                side,
                fills: Vec::new(),
            };
        }

        let commission = match side {
            OrderSide::Buy => quantity * fee,
            OrderSide::Sell => quantity * price * fee,
        };
        let commission_asset = match side {
            OrderSide::Buy => asset.to_string(),
            OrderSide::Sell => state.data.quote_asset.clone(),
        };

        OrderResponse {
            symbol,
            order_id,
            transact_time,
            executed_qty: quantity,
            cummulative_quote_qty: quantity * price,
            status: OrderStatus::Filled,
            side,
            fills: vec![Fill {
                price,
                qty: quantity,
                commission,
                commission_asset,
                trade_id: Some(order_id),
            }],
        }
    }
}

#[async_trait]
impl MarketClient for MockSpotClient {
    async fn get_strategy_data(&self, _assets: &[String]) -> Result<StrategyData> {
        let mut state = self.state.lock().await;
        let snapshot = state.data.clone();
        if !state.queued.is_empty() {
            state.data = state.queued.remove(0);
        }
        Ok(snapshot)
    }

    async fn place_market_buy(&self, asset: &str, quote_amount: Decimal) -> Result<OrderResponse> {
        let mut state = self.state.lock().await;
        state.orders.push(PlacedOrder {
            asset: asset.to_string(),
            side: OrderSide::Buy,
            amount: quote_amount,
        });

        let price = state.data.price(asset).unwrap_or_default();
        anyhow::ensure!(!price.is_zero(), "No price for {}", asset);
        let quantity = quote_amount / price;

        Ok(Self::synthesize(
            &mut state,
            asset,
            OrderSide::Buy,
            quantity,
            price,
            self.trade_fee,
            self.fill_orders,
        ))
    }

    async fn place_market_sell(&self, asset: &str, quantity: Decimal) -> Result<OrderResponse> {
        let mut state = self.state.lock().await;
        state.orders.push(PlacedOrder {
            asset: asset.to_string(),
            side: OrderSide::Sell,
            amount: quantity,
        });

        let price = state.data.price(asset).unwrap_or_default();
        anyhow::ensure!(!price.is_zero(), "No price for {}", asset);

        Ok(Self::synthesize(
            &mut state,
            asset,
            OrderSide::Sell,
            quantity,
            price,
            self.trade_fee,
            self.fill_orders,
        ))
    }
}
