//! # Spot Rebalancer
//!
//! A periodic portfolio-rebalancing bot for Binance spot markets: it keeps
//! a wallet of crypto assets near a configured target allocation by buying
//! the most underweight asset and selling profitable FIFO lots.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Binance spot REST client and wire types
//! - `strategy`: Allocation math, sizing, the trading operations, snapshots
//! - `store`: SQLite-backed lot/sell/deposits/earnings ledgers
//! - `notify`: Best-effort trade notifications

pub mod config;
pub mod exchange;
pub mod notify;
pub mod store;
pub mod strategy;

pub use config::Config;
