//! Candidate parsing and the raw-row to trade mapper.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::bar::parse_clock;
use super::error::ScreenerError;
use super::row::{get_bool, get_f64, get_text, RawRow};
use super::signal::{Direction, Signal};

/// Direction-aware return. A profitable trade is positive in either direction.
pub fn compute_return(direction: Direction, entry_price: f64, exit_price: f64) -> f64 {
    match direction {
        Direction::Long => (exit_price - entry_price) / entry_price,
        Direction::Short => (entry_price - exit_price) / entry_price,
    }
}

/// A pattern match awaiting confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub trade_date: NaiveDate,
    pub entry_time: NaiveTime,
    pub entry_price: f64,
    pub exit_time: NaiveTime,
    pub exit_price: f64,
    pub direction: Direction,
    pub rise_pct: Option<f64>,
    pub fall_pct: Option<f64>,
}

impl Candidate {
    /// Parse the candidate view of a row. The row's own `direction` column
    /// overrides `nominal` when present and valid.
    pub fn from_row(row: &RawRow, nominal: Direction) -> Result<Self, ScreenerError> {
        let direction = get_text(row, "direction")
            .and_then(|d| d.parse().ok())
            .unwrap_or(nominal);
        Ok(Candidate {
            trade_date: required_date(row, "trade_date")?,
            entry_time: required_time(row, "entry_time")?,
            entry_price: required_price(row, "entry_price")?,
            exit_time: required_time(row, "exit_time")?,
            exit_price: required_price(row, "exit_price")?,
            direction,
            rise_pct: get_f64(row, "rise_pct"),
            fall_pct: get_f64(row, "fall_pct"),
        })
    }

    pub fn entry_timestamp(&self) -> NaiveDateTime {
        self.trade_date.and_time(self.entry_time)
    }

    pub fn entry_signal(&self) -> Signal {
        Signal::entry(self.entry_timestamp(), self.entry_price, Some(self.direction))
    }
}

/// A confirmed trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub trade_date: NaiveDate,
    pub year: i32,
    pub entry_time: NaiveTime,
    pub entry_price: f64,
    pub exit_time: NaiveTime,
    pub exit_price: f64,
    pub direction: Direction,
    pub return_pct: f64,
    pub rise_pct: Option<f64>,
    pub fall_pct: Option<f64>,
    pub chart_path: Option<PathBuf>,
    pub atr_value: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub profit_target_price: Option<f64>,
    pub stop_loss_atr_multiplier: Option<f64>,
    pub profit_target_atr_multiplier: Option<f64>,
    pub use_atr_stops: Option<bool>,
    pub llm_stop_loss: Option<f64>,
    pub llm_profit_target: Option<f64>,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.return_pct > 0.0
    }

    /// Attach the screen's averaged proposals.
    pub fn with_screen_levels(mut self, stop_loss: Option<f64>, profit_target: Option<f64>) -> Self {
        self.llm_stop_loss = stop_loss;
        self.llm_profit_target = profit_target;
        self
    }
}

/// Map one raw row to a typed trade.
///
/// Only the columns named here are read; anything else on the row is dropped.
pub fn map_trade(
    row: &RawRow,
    direction: Direction,
    chart_path: Option<&Path>,
) -> Result<Trade, ScreenerError> {
    let trade_date = required_date(row, "trade_date")?;
    let entry_price = required_price(row, "entry_price")?;
    let exit_price = required_price(row, "exit_price")?;

    let year = match row.get("year") {
        Some(value) => value
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .ok_or_else(|| ScreenerError::RowMapping {
                reason: format!("invalid year '{}'", value.as_text()),
            })?,
        None => trade_date.year(),
    };

    Ok(Trade {
        trade_date,
        year,
        entry_time: required_time(row, "entry_time")?,
        entry_price,
        exit_time: required_time(row, "exit_time")?,
        exit_price,
        direction,
        return_pct: compute_return(direction, entry_price, exit_price),
        rise_pct: get_f64(row, "rise_pct"),
        fall_pct: get_f64(row, "fall_pct"),
        chart_path: chart_path.map(Path::to_path_buf),
        atr_value: get_f64(row, "atr_value"),
        stop_loss_price: get_f64(row, "stop_loss_price"),
        profit_target_price: get_f64(row, "profit_target_price"),
        stop_loss_atr_multiplier: get_f64(row, "stop_loss_atr_multiplier"),
        profit_target_atr_multiplier: get_f64(row, "profit_target_atr_multiplier"),
        use_atr_stops: get_bool(row, "use_atr_stops"),
        llm_stop_loss: None,
        llm_profit_target: None,
    })
}

fn missing(key: &str) -> ScreenerError {
    ScreenerError::RowMapping {
        reason: format!("missing column '{key}'"),
    }
}

fn required_date(row: &RawRow, key: &str) -> Result<NaiveDate, ScreenerError> {
    let text = get_text(row, key).ok_or_else(|| missing(key))?;
    // Query engines may render dates with a time component.
    let date_part = text.trim().get(..10).unwrap_or(text.trim());
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| ScreenerError::RowMapping {
        reason: format!("invalid {key} '{text}'"),
    })
}

fn required_time(row: &RawRow, key: &str) -> Result<NaiveTime, ScreenerError> {
    let text = get_text(row, key).ok_or_else(|| missing(key))?;
    parse_clock(&text).ok_or_else(|| ScreenerError::RowMapping {
        reason: format!("invalid {key} '{text}'"),
    })
}

fn required_price(row: &RawRow, key: &str) -> Result<f64, ScreenerError> {
    let value = get_f64(row, key).ok_or_else(|| match row.get(key) {
        Some(v) => ScreenerError::RowMapping {
            reason: format!("invalid {key} '{}'", v.as_text()),
        },
        None => missing(key),
    })?;
    if value <= 0.0 {
        return Err(ScreenerError::RowMapping {
            reason: format!("{key} must be positive, got {value}"),
        });
    }
    Ok(value)
}
