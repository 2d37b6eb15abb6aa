//! Binance spot REST API client.

use crate::config::BinanceConfig;
use crate::exchange::traits::MarketClient;
use crate::exchange::types::*;
use crate::strategy::{StrategyData, SymbolFilters};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Binance spot API client.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    quote_asset: String,
}

impl BinanceClient {
    /// Create a new client from configuration.
    pub fn new(config: &BinanceConfig, quote_asset: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if config.testnet {
            SPOT_TESTNET_URL.to_string()
        } else {
            SPOT_BASE_URL.to_string()
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url,
            quote_asset: quote_asset.to_uppercase(),
        })
    }

    /// Trading symbol for a base asset, e.g. `BTC` -> `BTCUSDT`.
    fn symbol(&self, asset: &str) -> String {
        format!("{}{}", asset, self.quote_asset).to_uppercase()
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    // ==================== Market Data (Public) ====================

    /// Exchange information for the given symbols.
    #[instrument(skip(self))]
    pub async fn get_exchange_info(&self, symbols: &[String]) -> Result<ExchangeInfo> {
        let symbols_json =
            serde_json::to_string(symbols).context("Failed to encode symbols list")?;
        let url = format!(
            "{}/api/v3/exchangeInfo?symbols={}",
            self.base_url,
            urlencoding::encode(&symbols_json)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch exchange info")?;

        response
            .json()
            .await
            .context("Failed to parse exchange info response")
    }

    /// Latest price for one symbol.
    #[instrument(skip(self))]
    pub async fn get_price(&self, symbol: &str) -> Result<TickerPrice> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch ticker price")?;

        response
            .json()
            .await
            .context("Failed to parse ticker price response")
    }

    // ==================== Account (Signed) ====================

    /// Account information including balances.
    #[instrument(skip(self))]
    pub async fn get_account(&self) -> Result<AccountInfo> {
        let query = format!("timestamp={}", Self::timestamp());
        let signature = self.sign(&query);
        let url = format!(
            "{}/api/v3/account?{}&signature={}",
            self.base_url, query, signature
        );

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to fetch account information")?;

        response
            .json()
            .await
            .context("Failed to parse account response")
    }

    /// Place a market order. Exactly one of `quantity` and `quote_order_qty`
    /// is set: sells are sized in the base asset, buys in the quote asset.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Option<Decimal>,
        quote_order_qty: Option<Decimal>,
    ) -> Result<OrderResponse> {
        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), format!("{:?}", side).to_uppercase()),
            ("type".to_string(), "MARKET".to_string()),
            ("newOrderRespType".to_string(), "FULL".to_string()),
            ("timestamp".to_string(), Self::timestamp().to_string()),
        ];

        if let Some(qty) = quantity {
            params.push(("quantity".to_string(), qty.to_string()));
        }

        if let Some(quote_qty) = quote_order_qty {
            params.push(("quoteOrderQty".to_string(), quote_qty.to_string()));
        }

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&query_string);
        let url = format!(
            "{}/api/v3/order?{}&signature={}",
            self.base_url, query_string, signature
        );

        debug!(%symbol, ?side, ?quantity, ?quote_order_qty, "Placing market order");

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to place market order")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Order rejected ({}): {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse order response")
    }

    /// Extract the strategy-relevant filters from a symbol's filter list.
    fn extract_filters(info: &SymbolInfo) -> Option<SymbolFilters> {
        let mut step_size = None;
        let mut min_qty = None;
        let mut min_notional = Decimal::ZERO;

        for filter in &info.filters {
            match filter {
                SymbolFilter::LotSize {
                    min_qty: mq,
                    step_size: step,
                    ..
                } => {
                    min_qty = Some(*mq);
                    step_size = Some(*step);
                }
                SymbolFilter::MinNotional { min_notional: mn }
                | SymbolFilter::Notional { min_notional: mn } => {
                    min_notional = min_notional.max(*mn);
                }
                SymbolFilter::Other => {}
            }
        }

        Some(SymbolFilters {
            step_size: step_size?,
            min_qty: min_qty?,
            min_notional,
        })
    }
}

#[async_trait]
impl MarketClient for BinanceClient {
    /// Assemble a fresh snapshot: balances and exchange info in parallel,
    /// then one price fetch per tracked asset.
    async fn get_strategy_data(&self, assets: &[String]) -> Result<StrategyData> {
        let symbols: Vec<String> = assets.iter().map(|a| self.symbol(a)).collect();

        let (account, info) =
            tokio::try_join!(self.get_account(), self.get_exchange_info(&symbols))?;

        let tickers = future::try_join_all(
            assets
                .iter()
                .map(|asset| self.get_price_for_asset(asset.clone())),
        )
        .await?;

        let balances: BTreeMap<String, Decimal> = account
            .balances
            .into_iter()
            .filter(|b| assets.contains(&b.asset) || b.asset == self.quote_asset)
            .map(|b| (b.asset, b.free))
            .collect();

        let prices: BTreeMap<String, Decimal> = tickers.into_iter().collect();

        let filters: BTreeMap<String, SymbolFilters> = info
            .symbols
            .iter()
            .filter_map(|s| {
                let asset = asset_from_symbol(&s.symbol, &self.quote_asset)?;
                Some((asset.to_string(), Self::extract_filters(s)?))
            })
            .collect();

        Ok(StrategyData::assemble(
            &self.quote_asset,
            assets,
            &balances,
            &prices,
            &filters,
        ))
    }

    async fn place_market_buy(
        &self,
        asset: &str,
        quote_amount: Decimal,
    ) -> Result<OrderResponse> {
        self.place_market_order(&self.symbol(asset), OrderSide::Buy, None, Some(quote_amount))
            .await
    }

    async fn place_market_sell(&self, asset: &str, quantity: Decimal) -> Result<OrderResponse> {
        self.place_market_order(&self.symbol(asset), OrderSide::Sell, Some(quantity), None)
            .await
    }
}

impl BinanceClient {
    async fn get_price_for_asset(&self, asset: String) -> Result<(String, Decimal)> {
        let ticker = self.get_price(&self.symbol(&asset)).await?;
        Ok((asset, ticker.price))
    }
}
