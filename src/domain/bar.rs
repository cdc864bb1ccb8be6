//! Intraday OHLCV bars, session classification and daily aggregation.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;

/// Minutes after midnight at which the regular session opens (09:30).
pub const SESSION_OPEN_MINUTE: u32 = 9 * 60 + 30;
/// Minutes after midnight at which the regular session closes (16:00).
pub const SESSION_CLOSE_MINUTE: u32 = 16 * 60;

pub fn session_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Session {
    PreMarket,
    Regular,
    AfterHours,
}

impl Session {
    /// Classify a clock time. The closing minute itself belongs to after-hours.
    pub fn of(time: NaiveTime) -> Self {
        let minute = time.hour() * 60 + time.minute();
        if minute < SESSION_OPEN_MINUTE {
            Session::PreMarket
        } else if minute < SESSION_CLOSE_MINUTE {
            Session::Regular
        } else {
            Session::AfterHours
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<i64>,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.timestamp.time()
    }

    pub fn session(&self) -> Session {
        Session::of(self.time())
    }

    pub fn is_regular_session(&self) -> bool {
        self.session() == Session::Regular
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// One row of a daily series, either supplied externally or derived from
/// regular-session intraday bars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Group regular-session bars by calendar day, preserving time order within a day.
pub fn regular_session_days(bars: &[Bar]) -> BTreeMap<NaiveDate, Vec<&Bar>> {
    let mut days: BTreeMap<NaiveDate, Vec<&Bar>> = BTreeMap::new();
    for bar in bars.iter().filter(|b| b.is_regular_session()) {
        days.entry(bar.date()).or_default().push(bar);
    }
    for day in days.values_mut() {
        day.sort_by_key(|b| b.timestamp);
    }
    days
}

/// Collapse regular-session bars into one daily bar per calendar day:
/// first open, max high, min low, last close, summed volume.
pub fn aggregate_daily(bars: &[Bar]) -> Vec<DailyBar> {
    regular_session_days(bars)
        .into_iter()
        .filter_map(|(date, day)| {
            let first = day.first()?;
            let last = day.last()?;
            Some(DailyBar {
                date,
                open: first.open,
                high: day.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max),
                low: day.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
                close: last.close,
                volume: day.iter().filter_map(|b| b.volume).sum(),
            })
        })
        .collect()
}

/// Parse a clock time written as `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: &str, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Bar {
        Bar {
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            open,
            high,
            low,
            close,
            volume: Some(volume),
        }
    }

    #[test]
    fn session_boundaries() {
        assert_eq!(Session::of(parse_clock("09:29").unwrap()), Session::PreMarket);
        assert_eq!(Session::of(parse_clock("09:30").unwrap()), Session::Regular);
        assert_eq!(Session::of(parse_clock("15:59").unwrap()), Session::Regular);
        assert_eq!(Session::of(parse_clock("16:00").unwrap()), Session::AfterHours);
        assert_eq!(Session::of(parse_clock("04:00").unwrap()), Session::PreMarket);
    }

    #[test]
    fn typical_price() {
        let b = bar("2024-01-15 10:00", 100.0, 110.0, 90.0, 105.0, 500);
        let expected = (110.0 + 90.0 + 105.0) / 3.0;
        assert!((b.typical_price() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn regular_session_days_drop_extended_hours() {
        let bars = vec![
            bar("2024-01-15 08:00", 1.0, 1.0, 1.0, 1.0, 10),
            bar("2024-01-15 09:31", 2.0, 2.0, 2.0, 2.0, 10),
            bar("2024-01-15 09:30", 3.0, 3.0, 3.0, 3.0, 10),
            bar("2024-01-15 16:05", 4.0, 4.0, 4.0, 4.0, 10),
        ];
        let days = regular_session_days(&bars);
        assert_eq!(days.len(), 1);
        let day = days.values().next().unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].open, 3.0);
        assert_eq!(day[1].open, 2.0);
    }

    #[test]
    fn aggregate_daily_builds_ohlcv() {
        let bars = vec![
            bar("2024-01-15 09:30", 100.0, 101.0, 99.0, 100.5, 1000),
            bar("2024-01-15 09:31", 100.5, 103.0, 100.0, 102.0, 2000),
            bar("2024-01-15 15:59", 102.0, 102.5, 98.0, 99.0, 500),
            bar("2024-01-16 09:30", 99.5, 100.0, 99.0, 99.8, 700),
        ];
        let daily = aggregate_daily(&bars);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].open, 100.0);
        assert_eq!(daily[0].high, 103.0);
        assert_eq!(daily[0].low, 98.0);
        assert_eq!(daily[0].close, 99.0);
        assert_eq!(daily[0].volume, 3500);
        assert_eq!(daily[1].date, NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
    }

    #[test]
    fn parse_clock_accepts_both_formats() {
        assert_eq!(parse_clock("09:45"), NaiveTime::from_hms_opt(9, 45, 0));
        assert_eq!(parse_clock("09:45:30"), NaiveTime::from_hms_opt(9, 45, 30));
        assert_eq!(parse_clock("9.45"), None);
    }
}
