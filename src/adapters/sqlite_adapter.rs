//! SQLite bar store and query engine.

use crate::domain::bar::{Bar, DailyBar};
use crate::domain::config::Timeframe;
use crate::domain::error::ScreenerError;
use crate::domain::row::{RawRow, RowValue};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::query_port::QueryPort;
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use rusqlite::types::ValueRef;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: impl std::fmt::Display) -> ScreenerError {
    ScreenerError::Database {
        reason: e.to_string(),
    }
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ScreenerError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| ScreenerError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).clamp(1, 64) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, ScreenerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, ScreenerError> {
        self.pool.get().map_err(db_err)
    }

    pub fn initialize_schema(&self) -> Result<(), ScreenerError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS bars (
                    ticker TEXT NOT NULL,
                    timeframe TEXT NOT NULL,
                    ts TEXT NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume INTEGER,
                    PRIMARY KEY (ticker, timeframe, ts)
                );
                CREATE INDEX IF NOT EXISTS idx_bars_ticker_ts ON bars(ticker, timeframe, ts);
                CREATE TABLE IF NOT EXISTS daily_bars (
                    ticker TEXT NOT NULL,
                    date TEXT NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume INTEGER NOT NULL,
                    PRIMARY KEY (ticker, date)
                );",
            )
            .map_err(db_err)
    }

    pub fn insert_bars(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<(), ScreenerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO bars (ticker, timeframe, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    ticker,
                    timeframe.as_str(),
                    bar.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)
    }

    pub fn insert_daily_bars(&self, ticker: &str, bars: &[DailyBar]) -> Result<(), ScreenerError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO daily_bars (ticker, date, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    ticker,
                    bar.date.format("%Y-%m-%d").to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)
    }
}

fn parse_stored<T>(
    raw: String,
    parse: impl Fn(&str) -> Result<T, chrono::ParseError>,
) -> rusqlite::Result<T> {
    parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(raw.len(), rusqlite::types::Type::Text, Box::new(e))
    })
}

impl DataPort for SqliteAdapter {
    fn fetch_bars(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ScreenerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ts, open, high, low, close, volume
                 FROM bars
                 WHERE ticker = ?1 AND timeframe = ?2 AND ts BETWEEN ?3 AND ?4
                 ORDER BY ts ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(
                params![
                    ticker,
                    timeframe.as_str(),
                    start.format("%Y-%m-%d 00:00:00").to_string(),
                    end.format("%Y-%m-%d 23:59:59").to_string()
                ],
                |row| {
                    let timestamp = parse_stored(row.get(0)?, |s| {
                        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                    })?;
                    Ok(Bar {
                        timestamp,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    })
                },
            )
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn fetch_daily_bars(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<DailyBar>>, ScreenerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT date, open, high, low, close, volume
                 FROM daily_bars
                 WHERE ticker = ?1 AND date BETWEEN ?2 AND ?3
                 ORDER BY date ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(
                params![
                    ticker,
                    start.format("%Y-%m-%d").to_string(),
                    end.format("%Y-%m-%d").to_string()
                ],
                |row| {
                    let date =
                        parse_stored(row.get(0)?, |s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))?;
                    Ok(DailyBar {
                        date,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    })
                },
            )
            .map_err(db_err)?;

        let daily = rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?;
        Ok((!daily.is_empty()).then_some(daily))
    }
}

impl QueryPort for SqliteAdapter {
    fn execute(&self, sql: &str) -> Result<Vec<RawRow>, ScreenerError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut raw = RawRow::new();
            for (index, name) in columns.iter().enumerate() {
                let value = match row.get_ref(index).map_err(db_err)? {
                    ValueRef::Null | ValueRef::Blob(_) => continue,
                    ValueRef::Integer(i) => RowValue::from(i),
                    ValueRef::Real(f) => RowValue::from(f),
                    ValueRef::Text(bytes) => RowValue::from(String::from_utf8_lossy(bytes).into_owned()),
                };
                raw.insert(name.clone(), value);
            }
            out.push(raw);
        }
        Ok(out)
    }
}
