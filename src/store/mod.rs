//! Durable order and ledger records.
//!
//! Every filled buy becomes a [`Lot`] that stays in the store forever; selling
//! a lot flips its `open` flag and attaches the closing [`SellRecord`].
//! Two singleton ledgers ride alongside: cumulative external deposits and the
//! signed per-asset earnings acquired through strategy trading.
//!
//! The store offers no cross-step transactions. Each call is individually
//! atomic, but a crash between a sell order filling and `close_lot` leaves the
//! sold lot re-sellable on the next cycle. That window is a documented hazard,
//! not something the store papers over.

mod mock;
mod sqlite;

pub use mock::MemoryLedger;
pub use sqlite::SqliteLedger;

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Time-ordered sort key for order records.
///
/// Transact time first so lexicographic order is chronological order; the
/// exchange order id disambiguates fills inside the same millisecond.
pub fn order_sort_key(transact_time: i64, order_id: u64) -> String {
    format!("{:013}-{:020}", transact_time.max(0), order_id)
}

/// One filled buy order, tracked until sold (FIFO unit of cost basis).
#[derive(Debug, Clone)]
pub struct Lot {
    /// Asset symbol (partition key).
    pub asset: String,
    /// Time-ordered identifier (sort key), see [`order_sort_key`].
    pub order_id: String,
    /// Raw exchange order payload as returned at fill time.
    pub payload: serde_json::Value,
    /// Net acquired quantity after the buy-side fee.
    pub quantity: Decimal,
    /// Quantity-weighted average fill price.
    pub avg_price: Decimal,
    /// Whether purchase capital came from the deposits pool.
    pub deposits_funded: bool,
    /// Unsold marker; cleared exactly once when the lot is closed.
    pub open: bool,
    /// Sort key of the sell record that closed this lot.
    pub closed_by: Option<String>,
}

/// One filled sell order, immutable once written.
#[derive(Debug, Clone)]
pub struct SellRecord {
    pub asset: String,
    pub order_id: String,
    pub payload: serde_json::Value,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    /// Sort key of the lot this sell closed.
    pub lot_order_id: String,
}

/// Singleton ledger of external capital.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositsLedger {
    /// Cumulative amount deposited from outside.
    pub deposited: Decimal,
    /// Cumulative amount already deployed into buys.
    pub used: Decimal,
}

impl DepositsLedger {
    /// Deposited capital not yet deployed. The gating check compares this
    /// against the next buy's quote amount; nothing reserves funds.
    pub fn available(&self) -> Decimal {
        self.deposited - self.used
    }
}

/// Valued per-asset entry inside a daily earnings snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub quantity: Decimal,
    pub value: Decimal,
}

/// Daily rollup of the earnings ledger, valued at snapshot-time prices.
#[derive(Debug, Clone)]
pub struct EarningsSnapshot {
    /// Snapshot day, `YYYY-MM-DD` (primary key).
    pub date: String,
    pub assets: BTreeMap<String, SnapshotEntry>,
    pub total_value: Decimal,
    /// Total value change versus the previous snapshot (0 if none).
    pub day_change: Decimal,
}

/// Persistent ledger store consumed by the strategy operations.
pub trait LedgerStore: Send + Sync {
    /// Persist a new lot. Fails if the (asset, order_id) pair already exists.
    fn put_lot(&self, lot: &Lot) -> Result<()>;

    /// Oldest open lot for an asset (FIFO selection), if any.
    fn oldest_open_lot(&self, asset: &str) -> Result<Option<Lot>>;

    /// All open lots across assets, oldest first.
    fn open_lots(&self) -> Result<Vec<Lot>>;

    /// Clear a lot's open marker and attach the closing sell reference.
    fn close_lot(&self, asset: &str, order_id: &str, closed_by: &str) -> Result<()>;

    /// Persist a sell record.
    fn put_sell(&self, sell: &SellRecord) -> Result<()>;

    /// Read the deposits ledger (zeroed if never written).
    fn deposits(&self) -> Result<DepositsLedger>;

    /// Record external capital: `deposited += amount`.
    fn add_deposit(&self, amount: Decimal) -> Result<DepositsLedger>;

    /// Record deployed capital: `used += amount`.
    fn add_deposits_used(&self, amount: Decimal) -> Result<DepositsLedger>;

    /// Signed additive update of one asset's earned quantity; returns the new
    /// cumulative value.
    fn add_earnings(&self, asset: &str, delta: Decimal) -> Result<Decimal>;

    /// The whole earnings ledger.
    fn earnings(&self) -> Result<BTreeMap<String, Decimal>>;

    /// Persist (or replace) a daily snapshot.
    fn put_snapshot(&self, snapshot: &EarningsSnapshot) -> Result<()>;

    /// Most recent snapshot strictly before `date`.
    fn latest_snapshot_before(&self, date: &str) -> Result<Option<EarningsSnapshot>>;
}
