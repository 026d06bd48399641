//! SQLite store for the registry and the RPC audit log.
//!
//! Persists:
//! - Accounts (venue and credentials)
//! - Instruments (symbol, contract value, lot size, leverage)
//! - One row per executed RPC call

use crate::exchange::Venue;
use crate::registry::{AccountSpec, InstrumentRegistry, InstrumentSpec};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// One audited RPC call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub method: String,
    pub request: String,
    pub code: u8,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Durable state used by the service.
pub trait Store: Send + Sync {
    /// Build a fresh registry snapshot from stored rows.
    fn load_registry(&self) -> Result<InstrumentRegistry>;

    fn upsert_account(&self, account: &AccountSpec) -> Result<()>;

    fn upsert_instrument(&self, instrument: &InstrumentSpec) -> Result<()>;

    fn record_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Most recent audit rows, newest first.
    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>>;
}

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database, creating the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                venue TEXT NOT NULL,
                api_key TEXT NOT NULL DEFAULT '',
                secret_key TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS instruments (
                id TEXT PRIMARY KEY,
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                contract_value TEXT NOT NULL,
                lot_size TEXT NOT NULL,
                leverage INTEGER
            );

            -- RPC audit log
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                method TEXT NOT NULL,
                request TEXT NOT NULL,
                code INTEGER NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_created ON executions(created_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn load_accounts(&self) -> Result<Vec<AccountSpec>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, venue, api_key, secret_key FROM accounts")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut accounts = Vec::new();
        for row in rows {
            let (id, venue, api_key, secret_key) = row?;
            match Venue::from_str(&venue) {
                Ok(venue) => accounts.push(AccountSpec {
                    id,
                    venue,
                    api_key,
                    secret_key,
                }),
                Err(e) => warn!(account = %id, error = %e, "Skipping account with unknown venue"),
            }
        }
        Ok(accounts)
    }

    fn load_instruments(&self) -> Result<Vec<InstrumentSpec>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, venue, symbol, contract_value, lot_size, leverage FROM instruments",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<u8>>(5)?,
            ))
        })?;

        let mut instruments = Vec::new();
        for row in rows {
            let (id, venue, symbol, contract_value, lot_size, leverage) = row?;
            let parsed = Venue::from_str(&venue).and_then(|venue| {
                Ok(InstrumentSpec {
                    id: id.clone(),
                    venue,
                    symbol,
                    contract_value: Decimal::from_str(&contract_value)
                        .context("Invalid contract_value")?,
                    lot_size: Decimal::from_str(&lot_size).context("Invalid lot_size")?,
                    leverage,
                })
            });
            match parsed {
                Ok(instrument) => instruments.push(instrument),
                Err(e) => warn!(instrument = %id, error = %e, "Skipping invalid instrument row"),
            }
        }
        Ok(instruments)
    }
}

impl Store for SqliteStore {
    fn load_registry(&self) -> Result<InstrumentRegistry> {
        let accounts = self.load_accounts()?;
        let instruments = self.load_instruments()?;

        info!(
            accounts = accounts.len(),
            instruments = instruments.len(),
            "Loaded registry from database"
        );
        Ok(InstrumentRegistry::new(accounts, instruments))
    }

    fn upsert_account(&self, account: &AccountSpec) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO accounts (id, venue, api_key, secret_key) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                venue = excluded.venue,
                api_key = excluded.api_key,
                secret_key = excluded.secret_key
            "#,
            params![
                account.id,
                account.venue.as_str(),
                account.api_key,
                account.secret_key
            ],
        )?;
        Ok(())
    }

    fn upsert_instrument(&self, instrument: &InstrumentSpec) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO instruments (id, venue, symbol, contract_value, lot_size, leverage)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                venue = excluded.venue,
                symbol = excluded.symbol,
                contract_value = excluded.contract_value,
                lot_size = excluded.lot_size,
                leverage = excluded.leverage
            "#,
            params![
                instrument.id,
                instrument.venue.as_str(),
                instrument.symbol,
                instrument.contract_value.to_string(),
                instrument.lot_size.to_string(),
                instrument.leverage,
            ],
        )?;
        Ok(())
    }

    fn record_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO executions (created_at, method, request, code, error, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.created_at.to_rfc3339(),
                record.method,
                record.request,
                record.code,
                record.error,
                record.duration_ms as i64,
            ],
        )?;
        Ok(())
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT created_at, method, request, code, error, duration_ms
            FROM executions ORDER BY id DESC LIMIT ?1
            "#,
        )?;

        let records = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ExecutionRecord {
                    created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(0)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    method: row.get(1)?,
                    request: row.get(2)?,
                    code: row.get(3)?,
                    error: row.get(4)?,
                    duration_ms: row.get::<_, i64>(5)?.max(0) as u64,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn instrument(id: &str) -> InstrumentSpec {
        InstrumentSpec {
            id: id.to_string(),
            venue: Venue::Binance,
            symbol: "BTCUSDT".to_string(),
            contract_value: Decimal::ONE,
            lot_size: dec!(0.001),
            leverage: Some(3),
        }
    }

    #[test]
    fn test_registry_round_trip_through_store() {
        let store = SqliteStore::new(":memory:").unwrap();

        store
            .upsert_account(&AccountSpec {
                id: "main".to_string(),
                venue: Venue::Binance,
                api_key: "key".to_string(),
                secret_key: "secret".to_string(),
            })
            .unwrap();
        store.upsert_instrument(&instrument("btc-perp")).unwrap();

        let mut updated = instrument("btc-perp");
        updated.lot_size = dec!(0.01);
        updated.leverage = None;
        store.upsert_instrument(&updated).unwrap();

        let registry = store.load_registry().unwrap();
        assert_eq!(registry.account_count(), 1);
        assert_eq!(registry.account("main").unwrap().venue, Venue::Binance);

        let loaded = registry.instrument("btc-perp").unwrap();
        assert_eq!(loaded.lot_size, dec!(0.01));
        assert_eq!(loaded.leverage, None);
    }

    #[test]
    fn test_execution_audit_newest_first() {
        let store = SqliteStore::new(":memory:").unwrap();

        for (method, code) in [("Order", 1u8), ("TargetPosition", 2u8)] {
            store
                .record_execution(&ExecutionRecord {
                    method: method.to_string(),
                    request: "{}".to_string(),
                    code,
                    error: None,
                    duration_ms: 5,
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let records = store.recent_executions(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].method, "TargetPosition");
        assert_eq!(records[0].code, 2);
        assert_eq!(records[1].method, "Order");
    }

    #[test]
    fn test_unknown_venue_rows_are_skipped() {
        let store = SqliteStore::new(":memory:").unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO accounts (id, venue) VALUES ('old', 'kraken')",
                [],
            )
            .unwrap();

        let registry = store.load_registry().unwrap();
        assert_eq!(registry.account_count(), 0);
    }
}
