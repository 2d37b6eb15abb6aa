//! Market/account snapshot assembled at the start of each strategy run.
//!
//! `StrategyData` merges wallet balances, ticker prices, and exchange filter
//! metadata into one read-only view. It is rebuilt from live state on every
//! cycle and never persisted; there is no cached exchange metadata anywhere
//! else in the process.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Target wallet allocation: asset symbol -> positive weight, arbitrary scale.
///
/// A `BTreeMap` so iteration order (and with it every tie-break in the
/// allocation math) is deterministic.
pub type TargetWallet = BTreeMap<String, Decimal>;

/// Trading filters for one symbol, extracted from exchange info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFilters {
    /// LOT_SIZE step: quantities must be a multiple of this.
    pub step_size: Decimal,
    /// LOT_SIZE minimum tradable quantity.
    pub min_qty: Decimal,
    /// Minimum order notional in the quote asset.
    pub min_notional: Decimal,
}

/// Per-asset state inside a `StrategyData` snapshot.
#[derive(Debug, Clone, Default)]
pub struct AssetState {
    /// Free (unlocked) balance.
    pub free_qty: Decimal,
    /// Last price in the quote asset. `1` for the quote asset itself.
    pub price: Decimal,
    /// `free_qty * price`, or `free_qty` for the quote asset.
    pub total_value: Decimal,
    /// Exchange trading filters; `None` for the quote asset.
    pub filters: Option<SymbolFilters>,
}

/// Snapshot of market and account state at a decision instant.
#[derive(Debug, Clone)]
pub struct StrategyData {
    /// The quote asset every tracked symbol trades against.
    pub quote_asset: String,
    /// Largest MIN_NOTIONAL requirement across tracked symbols.
    pub min_notional: Decimal,
    /// Tracked assets plus the quote asset.
    pub assets: BTreeMap<String, AssetState>,
}

impl StrategyData {
    /// Merge balances, prices, and filters into a snapshot.
    ///
    /// `tracked` enumerates the base assets under management; the quote asset
    /// is carried alongside them with `price = 1`.
    pub fn assemble(
        quote_asset: &str,
        tracked: &[String],
        balances: &BTreeMap<String, Decimal>,
        prices: &BTreeMap<String, Decimal>,
        filters: &BTreeMap<String, SymbolFilters>,
    ) -> Self {
        let mut assets = BTreeMap::new();

        for asset in tracked {
            let free_qty = balances.get(asset).copied().unwrap_or_default();
            let price = prices.get(asset).copied().unwrap_or_default();
            assets.insert(
                asset.clone(),
                AssetState {
                    free_qty,
                    price,
                    total_value: free_qty * price,
                    filters: filters.get(asset).cloned(),
                },
            );
        }

        let quote_qty = balances.get(quote_asset).copied().unwrap_or_default();
        assets.insert(
            quote_asset.to_string(),
            AssetState {
                free_qty: quote_qty,
                price: Decimal::ONE,
                total_value: quote_qty,
                filters: None,
            },
        );

        let min_notional = filters
            .values()
            .map(|f| f.min_notional)
            .max()
            .unwrap_or_default();

        Self {
            quote_asset: quote_asset.to_string(),
            min_notional,
            assets,
        }
    }

    /// Total quote-denominated value of an asset, `0` if untracked.
    pub fn total_value(&self, asset: &str) -> Decimal {
        self.assets
            .get(asset)
            .map(|a| a.total_value)
            .unwrap_or_default()
    }

    /// Current price of an asset, if present in the snapshot.
    pub fn price(&self, asset: &str) -> Option<Decimal> {
        self.assets.get(asset).map(|a| a.price)
    }

    /// Trading filters for an asset, if present.
    pub fn filters(&self, asset: &str) -> Option<&SymbolFilters> {
        self.assets.get(asset).and_then(|a| a.filters.as_ref())
    }

    /// Free balance of the quote asset.
    pub fn quote_balance(&self) -> Decimal {
        self.total_value(&self.quote_asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filters(step: Decimal, min_qty: Decimal, min_notional: Decimal) -> SymbolFilters {
        SymbolFilters {
            step_size: step,
            min_qty,
            min_notional,
        }
    }

    #[test]
    fn test_assemble_merges_totals_and_min_notional() {
        let tracked = vec!["BTC".to_string(), "ETH".to_string()];
        let balances = BTreeMap::from([
            ("BTC".to_string(), dec!(0.5)),
            ("ETH".to_string(), dec!(2)),
            ("USDT".to_string(), dec!(100)),
        ]);
        let prices = BTreeMap::from([
            ("BTC".to_string(), dec!(60000)),
            ("ETH".to_string(), dec!(3000)),
        ]);
        let fmap = BTreeMap::from([
            (
                "BTC".to_string(),
                filters(dec!(0.00001), dec!(0.00001), dec!(10)),
            ),
            (
                "ETH".to_string(),
                filters(dec!(0.0001), dec!(0.0001), dec!(12)),
            ),
        ]);

        let data = StrategyData::assemble("USDT", &tracked, &balances, &prices, &fmap);

        assert_eq!(data.total_value("BTC"), dec!(30000));
        assert_eq!(data.total_value("ETH"), dec!(6000));
        assert_eq!(data.quote_balance(), dec!(100));
        assert_eq!(data.min_notional, dec!(12));
        assert_eq!(data.price("USDT"), Some(Decimal::ONE));
        assert!(data.filters("USDT").is_none());
    }

    #[test]
    fn test_missing_balance_or_price_defaults_to_zero() {
        let tracked = vec!["BTC".to_string()];
        let data = StrategyData::assemble(
            "USDT",
            &tracked,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
        );

        assert_eq!(data.total_value("BTC"), Decimal::ZERO);
        assert_eq!(data.quote_balance(), Decimal::ZERO);
        assert_eq!(data.min_notional, Decimal::ZERO);
    }
}
