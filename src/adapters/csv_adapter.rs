//! CSV file bar source.
//!
//! Intraday bars live in `{ticker}_{timeframe}.csv` with the header
//! `timestamp,open,high,low,close,volume`. An optional `{ticker}_daily.csv`
//! (`date,open,high,low,close,volume`) supplies the daily series.

use crate::domain::bar::{Bar, DailyBar};
use crate::domain::config::Timeframe;
use crate::domain::error::ScreenerError;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub struct CsvAdapter {
    base_path: PathBuf,
}

fn read_err(path: &Path, reason: impl std::fmt::Display) -> ScreenerError {
    ScreenerError::Database {
        reason: format!("{}: {}", path.display(), reason),
    }
}

fn column<T: FromStr>(record: &StringRecord, index: usize, name: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let raw = record
        .get(index)
        .ok_or_else(|| format!("missing {name} column"))?;
    raw.trim()
        .parse()
        .map_err(|e| format!("invalid {name} value '{raw}': {e}"))
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and minute precision.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ScreenerError> {
        let dir = config
            .get_string("csv", "dir")
            .ok_or_else(|| ScreenerError::ConfigMissing {
                section: "csv".into(),
                key: "dir".into(),
            })?;
        Ok(Self::new(PathBuf::from(dir)))
    }

    fn bars_path(&self, ticker: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path.join(format!("{}_{}.csv", ticker, timeframe))
    }

    fn daily_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{}_daily.csv", ticker))
    }

    fn records(path: &Path) -> Result<Vec<StringRecord>, ScreenerError> {
        let content = fs::read_to_string(path).map_err(|e| read_err(path, e))?;
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        rdr.records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| read_err(path, format!("CSV parse error: {e}")))
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ScreenerError> {
        let path = self.bars_path(ticker, timeframe);
        let mut bars = Vec::new();

        for (line, record) in Self::records(&path)?.iter().enumerate() {
            let raw_ts = record.get(0).unwrap_or_default();
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
                read_err(&path, format!("row {}: invalid timestamp '{raw_ts}'", line + 1))
            })?;
            if timestamp.date() < start || timestamp.date() > end {
                continue;
            }

            let parsed = (|| -> Result<Bar, String> {
                let volume = match record.get(5).map(str::trim) {
                    None | Some("") => None,
                    Some(_) => Some(column::<i64>(record, 5, "volume")?),
                };
                Ok(Bar {
                    timestamp,
                    open: column(record, 1, "open")?,
                    high: column(record, 2, "high")?,
                    low: column(record, 3, "low")?,
                    close: column(record, 4, "close")?,
                    volume,
                })
            })();
            bars.push(parsed.map_err(|e| read_err(&path, format!("row {}: {e}", line + 1)))?);
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    fn fetch_daily_bars(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<DailyBar>>, ScreenerError> {
        let path = self.daily_path(ticker);
        if !path.exists() {
            return Ok(None);
        }

        let mut daily = Vec::new();
        for (line, record) in Self::records(&path)?.iter().enumerate() {
            let parsed = (|| -> Result<DailyBar, String> {
                let date_str = record.get(0).unwrap_or_default().trim();
                let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                    .map_err(|e| format!("invalid date '{date_str}': {e}"))?;
                Ok(DailyBar {
                    date,
                    open: column(record, 1, "open")?,
                    high: column(record, 2, "high")?,
                    low: column(record, 3, "low")?,
                    close: column(record, 4, "close")?,
                    volume: column(record, 5, "volume")?,
                })
            })()
            .map_err(|e| read_err(&path, format!("row {}: {e}", line + 1)))?;
            if parsed.date >= start && parsed.date <= end {
                daily.push(parsed);
            }
        }

        daily.sort_by_key(|d| d.date);
        Ok(Some(daily))
    }
}
