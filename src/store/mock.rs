//! In-memory ledger store for tests and dry runs.

use super::{DepositsLedger, EarningsSnapshot, LedgerStore, Lot, SellRecord};
use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    lots: Vec<Lot>,
    sells: Vec<SellRecord>,
    deposits: DepositsLedger,
    earnings: BTreeMap<String, Decimal>,
    snapshots: BTreeMap<String, EarningsSnapshot>,
}

/// Ledger store backed by plain collections, mirroring the SQLite semantics.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the deposits ledger, builder-style.
    pub fn with_deposits(self, deposited: Decimal, used: Decimal) -> Self {
        {
            let mut inner = self.inner.lock().expect("fresh mutex");
            inner.deposits = DepositsLedger { deposited, used };
        }
        self
    }

    /// All sell records written so far (test inspection).
    pub fn sells(&self) -> Vec<SellRecord> {
        self.inner.lock().expect("mutex").sells.clone()
    }

    /// All lots, open and closed (test inspection).
    pub fn lots(&self) -> Vec<Lot> {
        self.inner.lock().expect("mutex").lots.clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("ledger mutex poisoned"))
    }
}

impl LedgerStore for MemoryLedger {
    fn put_lot(&self, lot: &Lot) -> Result<()> {
        let mut inner = self.lock()?;
        anyhow::ensure!(
            !inner
                .lots
                .iter()
                .any(|l| l.asset == lot.asset && l.order_id == lot.order_id),
            "duplicate lot {}/{}",
            lot.asset,
            lot.order_id
        );
        inner.lots.push(lot.clone());
        Ok(())
    }

    fn oldest_open_lot(&self, asset: &str) -> Result<Option<Lot>> {
        let inner = self.lock()?;
        Ok(inner
            .lots
            .iter()
            .filter(|l| l.open && l.asset == asset)
            .min_by(|a, b| a.order_id.cmp(&b.order_id))
            .cloned())
    }

    fn open_lots(&self) -> Result<Vec<Lot>> {
        let inner = self.lock()?;
        let mut lots: Vec<Lot> = inner.lots.iter().filter(|l| l.open).cloned().collect();
        lots.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(lots)
    }

    fn close_lot(&self, asset: &str, order_id: &str, closed_by: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let lot = inner
            .lots
            .iter_mut()
            .find(|l| l.open && l.asset == asset && l.order_id == order_id)
            .ok_or_else(|| anyhow!("no open lot {}/{} to close", asset, order_id))?;
        lot.open = false;
        lot.closed_by = Some(closed_by.to_string());
        Ok(())
    }

    fn put_sell(&self, sell: &SellRecord) -> Result<()> {
        self.lock()?.sells.push(sell.clone());
        Ok(())
    }

    fn deposits(&self) -> Result<DepositsLedger> {
        Ok(self.lock()?.deposits.clone())
    }

    fn add_deposit(&self, amount: Decimal) -> Result<DepositsLedger> {
        let mut inner = self.lock()?;
        inner.deposits.deposited += amount;
        Ok(inner.deposits.clone())
    }

    fn add_deposits_used(&self, amount: Decimal) -> Result<DepositsLedger> {
        let mut inner = self.lock()?;
        inner.deposits.used += amount;
        Ok(inner.deposits.clone())
    }

    fn add_earnings(&self, asset: &str, delta: Decimal) -> Result<Decimal> {
        let mut inner = self.lock()?;
        let entry = inner.earnings.entry(asset.to_string()).or_default();
        *entry += delta;
        Ok(*entry)
    }

    fn earnings(&self) -> Result<BTreeMap<String, Decimal>> {
        Ok(self.lock()?.earnings.clone())
    }

    fn put_snapshot(&self, snapshot: &EarningsSnapshot) -> Result<()> {
        self.lock()?
            .snapshots
            .insert(snapshot.date.clone(), snapshot.clone());
        Ok(())
    }

    fn latest_snapshot_before(&self, date: &str) -> Result<Option<EarningsSnapshot>> {
        let inner = self.lock()?;
        Ok(inner
            .snapshots
            .range(..date.to_string())
            .next_back()
            .map(|(_, snap)| snap.clone()))
    }
}
