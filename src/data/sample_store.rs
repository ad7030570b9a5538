/// SQLite storage for token metadata and hourly samples
/// Upserts are idempotent; every batch commits in one transaction
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{FeedError, Result};
use crate::types::{HourlySample, TokenMetadata};

/// Shared handle to the sample database
///
/// Clones share one connection; the mutex serializes writers coming from
/// different collectors.
#[derive(Clone)]
pub struct SampleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SampleStore {
    /// Open (or create) the database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::from_connection(conn)?;
        info!("✅ Sample store opened at {}", path.display());
        Ok(store)
    }

    /// Run store work on the blocking pool, off the async workers
    pub async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&SampleStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| FeedError::InternalError(format!("Store task failed: {}", e)))?
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        create_tables(&conn)?;
        Ok(SampleStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or fully replace the metadata row for `token.symbol`
    pub fn upsert_token_metadata(&self, token: &TokenMetadata) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO token_metadata (symbol, name, total_supply, volume_usd, decimals)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(symbol) DO UPDATE SET
                name = excluded.name,
                total_supply = excluded.total_supply,
                volume_usd = excluded.volume_usd,
                decimals = excluded.decimals",
            params![
                token.symbol,
                token.name,
                token.total_supply.to_string(),
                token.volume_usd,
                token.decimals,
            ],
        )?;

        debug!("Upserted metadata for {}", token.symbol);
        Ok(())
    }

    /// Insert or replace a batch of samples for `symbol`, all or nothing
    pub fn upsert_hourly_samples(&self, symbol: &str, samples: &[HourlySample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO token_hour_data
                    (token_symbol, period_start_unix, open, close, high, low, price_usd)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(token_symbol, period_start_unix) DO UPDATE SET
                    open = excluded.open,
                    close = excluded.close,
                    high = excluded.high,
                    low = excluded.low,
                    price_usd = excluded.price_usd",
            )?;

            for sample in samples {
                stmt.execute(params![
                    symbol,
                    sample.period_start_unix,
                    sample.open,
                    sample.close,
                    sample.high,
                    sample.low,
                    sample.price_usd,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Upserted {} hourly samples for {}", samples.len(), symbol);
        Ok(samples.len())
    }

    /// All samples for `symbol`, ascending by period start
    pub fn get_hourly_samples(&self, symbol: &str) -> Result<Vec<HourlySample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT period_start_unix, open, close, high, low, price_usd
             FROM token_hour_data
             WHERE token_symbol = ?1
             ORDER BY period_start_unix ASC",
        )?;

        let rows = stmt.query_map(params![symbol], |row| {
            Ok(HourlySample {
                period_start_unix: row.get(0)?,
                open: row.get(1)?,
                close: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                price_usd: row.get(5)?,
            })
        })?;

        let samples = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    pub fn get_token_metadata(&self, symbol: &str) -> Result<Option<TokenMetadata>> {
        let conn = self.conn.lock();
        let token = conn
            .query_row(
                "SELECT symbol, name, total_supply, volume_usd, decimals
                 FROM token_metadata WHERE symbol = ?1",
                params![symbol],
                |row| {
                    let supply: String = row.get(2)?;
                    let total_supply = supply.parse::<u128>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
                    })?;

                    Ok(TokenMetadata {
                        symbol: row.get(0)?,
                        name: row.get(1)?,
                        total_supply,
                        volume_usd: row.get(3)?,
                        decimals: row.get(4)?,
                    })
                },
            )
            .optional()?;

        Ok(token)
    }

    /// Latest stored period start for `symbol`
    pub fn latest_period_start(&self, symbol: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let latest: Option<i64> = conn.query_row(
            "SELECT MAX(period_start_unix) FROM token_hour_data WHERE token_symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    pub fn count_hourly_samples(&self, symbol: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM token_hour_data WHERE token_symbol = ?1",
            params![symbol],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS token_metadata (
            symbol TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            total_supply TEXT NOT NULL,
            volume_usd REAL NOT NULL,
            decimals REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS token_hour_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token_symbol TEXT NOT NULL,
            period_start_unix INTEGER NOT NULL,
            open REAL NOT NULL,
            close REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            price_usd REAL NOT NULL,
            UNIQUE(token_symbol, period_start_unix)
        );",
    )?;
    Ok(())
}
