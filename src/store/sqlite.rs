//! SQLite-backed ledger store.
//!
//! Decimals are stored as TEXT and parsed back with `Decimal::from_str`, the
//! same convention the rest of the codebase uses for wire decimals. Ledger
//! updates are read-modify-write under the connection mutex; each store call
//! is atomic on its own, multi-call sequences are not.

use super::{DepositsLedger, EarningsSnapshot, LedgerStore, Lot, SellRecord, SnapshotEntry};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite ledger store.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database and initialize its schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Ledger store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("ledger connection mutex poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            -- Buy orders tracked until sold
            CREATE TABLE IF NOT EXISTS lots (
                asset TEXT NOT NULL,
                order_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                quantity TEXT NOT NULL,
                avg_price TEXT NOT NULL,
                deposits_funded INTEGER NOT NULL,
                open INTEGER NOT NULL,
                closed_by TEXT,
                PRIMARY KEY (asset, order_id)
            );
            CREATE INDEX IF NOT EXISTS idx_lots_open ON lots(asset, open, order_id);

            -- Closing sell orders
            CREATE TABLE IF NOT EXISTS sells (
                asset TEXT NOT NULL,
                order_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                quantity TEXT NOT NULL,
                avg_price TEXT NOT NULL,
                lot_order_id TEXT NOT NULL,
                PRIMARY KEY (asset, order_id)
            );

            -- External capital ledger (singleton row)
            CREATE TABLE IF NOT EXISTS deposits (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                deposited TEXT NOT NULL,
                used TEXT NOT NULL
            );

            -- Signed cumulative quantity earned via strategy trading
            CREATE TABLE IF NOT EXISTS earnings (
                asset TEXT PRIMARY KEY,
                quantity TEXT NOT NULL
            );

            -- Daily earnings rollups
            CREATE TABLE IF NOT EXISTS earnings_snapshots (
                date TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                total_value TEXT NOT NULL,
                day_change TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Ledger schema initialized");
        Ok(())
    }
}

fn parse_decimal(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap_or_default()
}

fn lot_from_row(row: &Row<'_>) -> rusqlite::Result<Lot> {
    Ok(Lot {
        asset: row.get(0)?,
        order_id: row.get(1)?,
        payload: serde_json::from_str(&row.get::<_, String>(2)?)
            .unwrap_or(serde_json::Value::Null),
        quantity: parse_decimal(&row.get::<_, String>(3)?),
        avg_price: parse_decimal(&row.get::<_, String>(4)?),
        deposits_funded: row.get::<_, i64>(5)? != 0,
        open: row.get::<_, i64>(6)? != 0,
        closed_by: row.get(7)?,
    })
}

const LOT_COLUMNS: &str =
    "asset, order_id, payload, quantity, avg_price, deposits_funded, open, closed_by";

impl LedgerStore for SqliteLedger {
    fn put_lot(&self, lot: &Lot) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO lots (asset, order_id, payload, quantity, avg_price,
                              deposits_funded, open, closed_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                lot.asset,
                lot.order_id,
                lot.payload.to_string(),
                lot.quantity.to_string(),
                lot.avg_price.to_string(),
                lot.deposits_funded as i64,
                lot.open as i64,
                lot.closed_by,
            ],
        )?;
        Ok(())
    }

    fn oldest_open_lot(&self, asset: &str) -> Result<Option<Lot>> {
        let conn = self.conn()?;
        let lot = conn
            .query_row(
                &format!(
                    "SELECT {LOT_COLUMNS} FROM lots
                     WHERE asset = ?1 AND open = 1
                     ORDER BY order_id ASC LIMIT 1"
                ),
                params![asset],
                lot_from_row,
            )
            .optional()?;
        Ok(lot)
    }

    fn open_lots(&self) -> Result<Vec<Lot>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOT_COLUMNS} FROM lots WHERE open = 1 ORDER BY order_id ASC"
        ))?;
        let lots = stmt
            .query_map([], lot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(lots)
    }

    fn close_lot(&self, asset: &str, order_id: &str, closed_by: &str) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE lots SET open = 0, closed_by = ?3
             WHERE asset = ?1 AND order_id = ?2 AND open = 1",
            params![asset, order_id, closed_by],
        )?;
        anyhow::ensure!(updated == 1, "no open lot {}/{} to close", asset, order_id);
        Ok(())
    }

    fn put_sell(&self, sell: &SellRecord) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO sells (asset, order_id, payload, quantity, avg_price, lot_order_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                sell.asset,
                sell.order_id,
                sell.payload.to_string(),
                sell.quantity.to_string(),
                sell.avg_price.to_string(),
                sell.lot_order_id,
            ],
        )?;
        Ok(())
    }

    fn deposits(&self) -> Result<DepositsLedger> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT deposited, used FROM deposits WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row
            .map(|(deposited, used)| DepositsLedger {
                deposited: parse_decimal(&deposited),
                used: parse_decimal(&used),
            })
            .unwrap_or_default())
    }

    fn add_deposit(&self, amount: Decimal) -> Result<DepositsLedger> {
        let mut ledger = self.deposits()?;
        ledger.deposited += amount;
        self.write_deposits(&ledger)?;
        Ok(ledger)
    }

    fn add_deposits_used(&self, amount: Decimal) -> Result<DepositsLedger> {
        let mut ledger = self.deposits()?;
        ledger.used += amount;
        self.write_deposits(&ledger)?;
        Ok(ledger)
    }

    fn add_earnings(&self, asset: &str, delta: Decimal) -> Result<Decimal> {
        let conn = self.conn()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT quantity FROM earnings WHERE asset = ?1",
                params![asset],
                |row| row.get(0),
            )
            .optional()?;

        let updated = existing.as_deref().map(parse_decimal).unwrap_or_default() + delta;
        conn.execute(
            r#"
            INSERT INTO earnings (asset, quantity) VALUES (?1, ?2)
            ON CONFLICT(asset) DO UPDATE SET quantity = ?2
            "#,
            params![asset, updated.to_string()],
        )?;
        Ok(updated)
    }

    fn earnings(&self) -> Result<BTreeMap<String, Decimal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT asset, quantity FROM earnings")?;
        let ledger = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    parse_decimal(&row.get::<_, String>(1)?),
                ))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(ledger)
    }

    fn put_snapshot(&self, snapshot: &EarningsSnapshot) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO earnings_snapshots (date, payload, total_value, day_change, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(date) DO UPDATE SET
                payload = ?2, total_value = ?3, day_change = ?4, created_at = ?5
            "#,
            params![
                snapshot.date,
                serde_json::to_string(&snapshot.assets)?,
                snapshot.total_value.to_string(),
                snapshot.day_change.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn latest_snapshot_before(&self, date: &str) -> Result<Option<EarningsSnapshot>> {
        let conn = self.conn()?;
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                r#"
                SELECT date, payload, total_value, day_change
                FROM earnings_snapshots
                WHERE date < ?1
                ORDER BY date DESC LIMIT 1
                "#,
                params![date],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((date, payload, total_value, day_change)) = row else {
            return Ok(None);
        };

        let assets: BTreeMap<String, SnapshotEntry> =
            serde_json::from_str(&payload).context("Failed to parse snapshot payload")?;

        Ok(Some(EarningsSnapshot {
            date,
            assets,
            total_value: parse_decimal(&total_value),
            day_change: parse_decimal(&day_change),
        }))
    }
}

impl SqliteLedger {
    fn write_deposits(&self, ledger: &DepositsLedger) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO deposits (id, deposited, used) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET deposited = ?1, used = ?2
            "#,
            params![ledger.deposited.to_string(), ledger.used.to_string()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::order_sort_key;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn test_lot(asset: &str, transact_time: i64, order_id: u64, qty: Decimal) -> Lot {
        Lot {
            asset: asset.to_string(),
            order_id: order_sort_key(transact_time, order_id),
            payload: json!({"symbol": format!("{asset}USDT")}),
            quantity: qty,
            avg_price: dec!(100),
            deposits_funded: false,
            open: true,
            closed_by: None,
        }
    }

    #[test]
    fn test_oldest_open_lot_is_fifo() {
        let store = SqliteLedger::in_memory().unwrap();
        store.put_lot(&test_lot("BTC", 2000, 11, dec!(0.2))).unwrap();
        store.put_lot(&test_lot("BTC", 1000, 10, dec!(0.1))).unwrap();
        store.put_lot(&test_lot("ETH", 1500, 12, dec!(1))).unwrap();

        let oldest = store.oldest_open_lot("BTC").unwrap().unwrap();
        assert_eq!(oldest.quantity, dec!(0.1));
        assert!(store.oldest_open_lot("ADA").unwrap().is_none());
    }

    #[test]
    fn test_close_lot_removes_it_from_open_queries() {
        let store = SqliteLedger::in_memory().unwrap();
        let first = test_lot("BTC", 1000, 10, dec!(0.1));
        store.put_lot(&first).unwrap();
        store.put_lot(&test_lot("BTC", 2000, 11, dec!(0.2))).unwrap();

        store.close_lot("BTC", &first.order_id, "sell-key").unwrap();

        let oldest = store.oldest_open_lot("BTC").unwrap().unwrap();
        assert_eq!(oldest.quantity, dec!(0.2));

        // Closing twice is an error: the open marker is already gone.
        assert!(store.close_lot("BTC", &first.order_id, "sell-key").is_err());
    }

    #[test]
    fn test_recorded_sell_does_not_close_the_lot() {
        let store = SqliteLedger::in_memory().unwrap();
        let lot = test_lot("BTC", 1000, 10, dec!(0.1));
        store.put_lot(&lot).unwrap();
        store
            .put_sell(&SellRecord {
                asset: "BTC".to_string(),
                order_id: order_sort_key(3000, 20),
                payload: json!({"symbol": "BTCUSDT"}),
                quantity: dec!(0.1),
                avg_price: dec!(110),
                lot_order_id: lot.order_id.clone(),
            })
            .unwrap();

        // The lot stays open until close_lot runs, so an interrupted
        // sale is retried against the same lot.
        let oldest = store.oldest_open_lot("BTC").unwrap().unwrap();
        assert_eq!(oldest.order_id, lot.order_id);
    }

    #[test]
    fn test_deposits_ledger_roundtrip() {
        let store = SqliteLedger::in_memory().unwrap();
        assert_eq!(store.deposits().unwrap(), DepositsLedger::default());

        store.add_deposit(dec!(1000)).unwrap();
        let ledger = store.add_deposits_used(dec!(30)).unwrap();
        assert_eq!(ledger.deposited, dec!(1000));
        assert_eq!(ledger.used, dec!(30));
        assert_eq!(ledger.available(), dec!(970));
    }

    #[test]
    fn test_earnings_are_signed() {
        let store = SqliteLedger::in_memory().unwrap();
        store.add_earnings("BTC", dec!(0.5)).unwrap();
        let after_sell = store.add_earnings("BTC", dec!(-0.7)).unwrap();
        assert_eq!(after_sell, dec!(-0.2));

        let ledger = store.earnings().unwrap();
        assert_eq!(ledger["BTC"], dec!(-0.2));
    }

    #[test]
    fn test_snapshot_lookup_by_date() {
        let store = SqliteLedger::in_memory().unwrap();
        let snap = EarningsSnapshot {
            date: "2024-05-01".to_string(),
            assets: BTreeMap::from([(
                "BTC".to_string(),
                SnapshotEntry {
                    quantity: dec!(0.01),
                    value: dec!(600),
                },
            )]),
            total_value: dec!(600),
            day_change: dec!(0),
        };
        store.put_snapshot(&snap).unwrap();

        let prev = store.latest_snapshot_before("2024-05-02").unwrap().unwrap();
        assert_eq!(prev.total_value, dec!(600));
        assert!(store
            .latest_snapshot_before("2024-05-01")
            .unwrap()
            .is_none());
    }
}
