//! Configuration management for the spot rebalancer.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Rebalancing strategy parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Ledger persistence settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Trade notification settings
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Quote asset every tracked symbol trades against
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Target wallet: asset -> relative weight (any positive scale)
    #[serde(default = "default_target_wallet")]
    pub target_wallet: BTreeMap<String, Decimal>,
    /// Exchange fee per market order side (0.001 = 0.1%)
    #[serde(default = "default_trade_fee")]
    pub trade_fee: Decimal,
    /// Minimum round-trip profit ratio before a lot becomes sellable
    #[serde(default = "default_min_profit")]
    pub min_profit: Decimal,
    /// Padding applied to the exchange MIN_NOTIONAL when sizing orders
    #[serde(default = "default_min_notional_multiplier")]
    pub min_notional_multiplier: Decimal,
    /// Deviation z-score above which an unprofitable lot still qualifies
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,
    /// Position must be worth this many effective minimums to be sellable
    #[serde(default = "default_min_trade_size_multiplier")]
    pub min_trade_size_multiplier: u32,
    /// How many of the most underweight assets are protected from selling
    #[serde(default = "default_exclude_lowest_count")]
    pub exclude_lowest_count: usize,
    /// Hypothetical transfer size (in MIN_NOTIONALs) for the sell veto check
    #[serde(default = "default_projection_multiplier")]
    pub projection_multiplier: Decimal,
    /// Seconds between strategy cycles
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    /// UTC hour after which the daily earnings snapshot runs
    #[serde(default = "default_snapshot_hour_utc")]
    pub snapshot_hour_utc: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Incoming webhook URL; empty disables notifications
    #[serde(default)]
    pub webhook_url: String,
}

// Default value functions
fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_target_wallet() -> BTreeMap<String, Decimal> {
    BTreeMap::from([
        ("BTC".to_string(), Decimal::new(100, 0)),
        ("ETH".to_string(), Decimal::new(50, 0)),
        ("BNB".to_string(), Decimal::new(20, 0)),
    ])
}

fn default_trade_fee() -> Decimal {
    Decimal::new(1, 3) // 0.001 (0.1% per side)
}

fn default_min_profit() -> Decimal {
    Decimal::new(1, 2) // 0.01 (1% after round-trip fees)
}

fn default_min_notional_multiplier() -> Decimal {
    Decimal::new(15, 1) // 1.5
}

fn default_z_score_threshold() -> f64 {
    1.0
}

fn default_min_trade_size_multiplier() -> u32 {
    3
}

fn default_exclude_lowest_count() -> usize {
    1
}

fn default_projection_multiplier() -> Decimal {
    Decimal::new(3, 0)
}

fn default_cycle_secs() -> u64 {
    30
}

fn default_snapshot_hour_utc() -> u32 {
    23
}

fn default_db_path() -> String {
    "data/ledger.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("SRB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.strategy.target_wallet.is_empty()
                && self
                    .strategy
                    .target_wallet
                    .values()
                    .all(|w| *w > Decimal::ZERO),
            "target_wallet must contain only positive weights"
        );

        anyhow::ensure!(
            !self
                .strategy
                .target_wallet
                .contains_key(&self.strategy.quote_asset),
            "target_wallet must not include the quote asset"
        );

        anyhow::ensure!(
            self.strategy.trade_fee >= Decimal::ZERO && self.strategy.trade_fee < Decimal::ONE,
            "trade_fee must be between 0 and 1"
        );

        anyhow::ensure!(
            self.strategy.min_notional_multiplier >= Decimal::ONE,
            "min_notional_multiplier must be at least 1"
        );

        anyhow::ensure!(
            self.strategy.exclude_lowest_count < self.strategy.target_wallet.len(),
            "exclude_lowest_count must leave at least one sellable asset"
        );

        anyhow::ensure!(
            self.strategy.cycle_secs >= 1,
            "cycle_secs must be at least 1"
        );

        anyhow::ensure!(
            self.strategy.snapshot_hour_utc <= 23,
            "snapshot_hour_utc must be an hour of day"
        );

        Ok(())
    }
}

impl StrategyConfig {
    /// Base assets under management, in deterministic order.
    pub fn tracked_assets(&self) -> Vec<String> {
        self.target_wallet.keys().cloned().collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binance: BinanceConfig::default(),
            strategy: StrategyConfig::default(),
            store: StoreConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            quote_asset: default_quote_asset(),
            target_wallet: default_target_wallet(),
            trade_fee: default_trade_fee(),
            min_profit: default_min_profit(),
            min_notional_multiplier: default_min_notional_multiplier(),
            z_score_threshold: default_z_score_threshold(),
            min_trade_size_multiplier: default_min_trade_size_multiplier(),
            exclude_lowest_count: default_exclude_lowest_count(),
            projection_multiplier: default_projection_multiplier(),
            cycle_secs: default_cycle_secs(),
            snapshot_hour_utc: default_snapshot_hour_utc(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
        }
    }
}
