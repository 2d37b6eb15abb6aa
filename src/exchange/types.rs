//! Type definitions for Binance spot API responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Spot exchange information (filter metadata per symbol).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

/// Per-symbol exchange information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Trading filters attached to a symbol. Only the filters the strategy reads
/// are modeled; everything else collapses into `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        min_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        max_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional {
        #[serde(with = "rust_decimal::serde::str")]
        min_notional: Decimal,
    },
    /// Newer symbols carry NOTIONAL instead of MIN_NOTIONAL.
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional {
        #[serde(with = "rust_decimal::serde::str")]
        min_notional: Decimal,
    },
    #[serde(other)]
    Other,
}

/// Account information (balances subset).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
}

/// One asset balance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

/// Symbol price ticker.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Other,
}

/// One execution inside a filled order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    pub commission_asset: String,
    #[serde(default)]
    pub trade_id: Option<u64>,
}

/// Response to a new spot order (FULL response type, fills included).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    pub transact_time: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty", with = "rust_decimal::serde::str")]
    pub cummulative_quote_qty: Decimal,
    pub status: OrderStatus,
    pub side: OrderSide,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

impl OrderResponse {
    /// Only fully filled orders are recorded; anything else is a soft miss.
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// Base asset of a `{ASSET}{QUOTE}` symbol, if it carries the given quote.
pub fn asset_from_symbol<'a>(symbol: &'a str, quote_asset: &str) -> Option<&'a str> {
    symbol
        .strip_suffix(quote_asset)
        .filter(|base| !base.is_empty())
}
