//! Entry and exit patterns.
//!
//! Each pattern kind is a variant with a fixed capability set: a human
//! description, a SQL fragment for the query engine, and an in-process
//! detector over one day's regular-session bars. The fragment and the
//! detector implement the same rule.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Serialize;

use super::bar::{parse_clock, regular_session_days, session_open, Bar, Session};
use super::error::ScreenerError;
use super::row::{RawRow, RowValue};
use super::signal::Direction;
use crate::ports::config_port::ConfigPort;

pub trait PatternSpec {
    fn name(&self) -> &'static str;
    fn describe(&self) -> String;
    /// SQL selecting one row per matching trade date.
    fn to_query_fragment(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPattern {
    QuickRise { rise_pct: f64, within_minutes: u32 },
    QuickFall { fall_pct: f64, within_minutes: u32 },
    FixedTime { time: NaiveTime },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitPattern {
    FixedTime { time: NaiveTime },
    MaxHold { minutes: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryHit {
    pub time: NaiveTime,
    pub price: f64,
    pub rise_pct: Option<f64>,
    pub fall_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitHit {
    pub time: NaiveTime,
    pub price: f64,
}

pub const ENTRY_PATTERNS: &[&str] = &["quick_rise", "quick_fall", "fixed_time"];
pub const EXIT_PATTERNS: &[&str] = &["fixed_time", "max_hold"];

fn clock_literal(time: NaiveTime) -> String {
    format!("'{}'", time.format("%H:%M:%S"))
}

fn window_end(within_minutes: u32) -> NaiveTime {
    session_open() + Duration::minutes(i64::from(within_minutes))
}

/// Reject keys in `section` outside the pattern's option set.
fn check_options(
    config: &dyn ConfigPort,
    section: &str,
    options: &[&str],
) -> Result<(), ScreenerError> {
    for key in config.keys(section) {
        if key != "pattern" && !options.contains(&key.as_str()) {
            return Err(ScreenerError::ConfigInvalid {
                section: section.to_string(),
                key,
                reason: format!("not an option of this pattern (allowed: {})", options.join(", ")),
            });
        }
    }
    Ok(())
}

fn required_pct(config: &dyn ConfigPort, section: &str, key: &str) -> Result<f64, ScreenerError> {
    let value = config.get_double(section, key, f64::NAN);
    if !value.is_finite() {
        return Err(ScreenerError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        });
    }
    if value <= 0.0 || value >= 100.0 {
        return Err(ScreenerError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: "must be between 0 and 100 (exclusive)".to_string(),
        });
    }
    Ok(value)
}

fn minutes_option(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<u32, ScreenerError> {
    let value = config.get_int(section, key, default);
    if !(1..=390).contains(&value) {
        return Err(ScreenerError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: "must be between 1 and 390 minutes".to_string(),
        });
    }
    Ok(value as u32)
}

fn time_option(config: &dyn ConfigPort, section: &str, key: &str) -> Result<NaiveTime, ScreenerError> {
    let raw = config
        .get_string(section, key)
        .ok_or_else(|| ScreenerError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        })?;
    let time = parse_clock(&raw).ok_or_else(|| ScreenerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: format!("invalid time '{raw}' (expected HH:MM)"),
    })?;
    if Session::of(time) != Session::Regular {
        return Err(ScreenerError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: "must fall inside the regular session (09:30-16:00)".to_string(),
        });
    }
    Ok(time)
}

fn pattern_name(config: &dyn ConfigPort, section: &str) -> Result<String, ScreenerError> {
    config
        .get_string(section, "pattern")
        .map(|p| p.trim().to_ascii_lowercase())
        .ok_or_else(|| ScreenerError::ConfigMissing {
            section: section.to_string(),
            key: "pattern".to_string(),
        })
}

impl EntryPattern {
    /// Build from the `[entry]`-style section named `section`.
    pub fn from_config(config: &dyn ConfigPort, section: &str) -> Result<Self, ScreenerError> {
        let name = pattern_name(config, section)?;
        match name.as_str() {
            "quick_rise" => {
                check_options(config, section, &["rise_pct", "within_minutes"])?;
                Ok(EntryPattern::QuickRise {
                    rise_pct: required_pct(config, section, "rise_pct")?,
                    within_minutes: minutes_option(config, section, "within_minutes", 15)?,
                })
            }
            "quick_fall" => {
                check_options(config, section, &["fall_pct", "within_minutes"])?;
                Ok(EntryPattern::QuickFall {
                    fall_pct: required_pct(config, section, "fall_pct")?,
                    within_minutes: minutes_option(config, section, "within_minutes", 15)?,
                })
            }
            "fixed_time" => {
                check_options(config, section, &["time"])?;
                Ok(EntryPattern::FixedTime {
                    time: time_option(config, section, "time")?,
                })
            }
            other => Err(ScreenerError::UnknownPattern {
                role: "entry".to_string(),
                name: other.to_string(),
                expected: ENTRY_PATTERNS.join(", "),
            }),
        }
    }

    /// First qualifying bar of one day's regular session, in time order.
    pub fn detect(&self, day: &[&Bar]) -> Option<EntryHit> {
        let day_open = day.first()?.open;
        match self {
            EntryPattern::QuickRise {
                rise_pct,
                within_minutes,
            } => {
                let end = window_end(*within_minutes);
                let threshold = day_open * (1.0 + rise_pct / 100.0);
                day.iter()
                    .find(|b| b.time() <= end && b.close >= threshold)
                    .map(|b| EntryHit {
                        time: b.time(),
                        price: b.close,
                        rise_pct: Some((b.close - day_open) / day_open * 100.0),
                        fall_pct: None,
                    })
            }
            EntryPattern::QuickFall {
                fall_pct,
                within_minutes,
            } => {
                let end = window_end(*within_minutes);
                let threshold = day_open * (1.0 - fall_pct / 100.0);
                day.iter()
                    .find(|b| b.time() <= end && b.close <= threshold)
                    .map(|b| EntryHit {
                        time: b.time(),
                        price: b.close,
                        rise_pct: None,
                        fall_pct: Some((day_open - b.close) / day_open * 100.0),
                    })
            }
            EntryPattern::FixedTime { time } => {
                day.iter().find(|b| b.time() >= *time).map(|b| EntryHit {
                    time: b.time(),
                    price: b.open,
                    rise_pct: None,
                    fall_pct: None,
                })
            }
        }
    }
}

impl PatternSpec for EntryPattern {
    fn name(&self) -> &'static str {
        match self {
            EntryPattern::QuickRise { .. } => "quick_rise",
            EntryPattern::QuickFall { .. } => "quick_fall",
            EntryPattern::FixedTime { .. } => "fixed_time",
        }
    }

    fn describe(&self) -> String {
        match self {
            EntryPattern::QuickRise {
                rise_pct,
                within_minutes,
            } => format!(
                "Price closes at least {rise_pct}% above the day's open within the first {within_minutes} minutes"
            ),
            EntryPattern::QuickFall {
                fall_pct,
                within_minutes,
            } => format!(
                "Price closes at least {fall_pct}% below the day's open within the first {within_minutes} minutes"
            ),
            EntryPattern::FixedTime { time } => {
                format!("Enter at the open of the first bar at or after {}", time.format("%H:%M"))
            }
        }
    }

    fn to_query_fragment(&self) -> String {
        match self {
            EntryPattern::QuickRise {
                rise_pct,
                within_minutes,
            } => first_bar_per_day(
                "s.close AS entry_price,
               (s.close - s.day_open) / s.day_open * 100.0 AS rise_pct,
               NULL AS fall_pct",
                &format!(
                    "s.bar_time <= {end}
          AND s.close >= s.day_open * (1.0 + {rise_pct:?} / 100.0)",
                    end = clock_literal(window_end(*within_minutes)),
                ),
            ),
            EntryPattern::QuickFall {
                fall_pct,
                within_minutes,
            } => first_bar_per_day(
                "s.close AS entry_price,
               NULL AS rise_pct,
               (s.day_open - s.close) / s.day_open * 100.0 AS fall_pct",
                &format!(
                    "s.bar_time <= {end}
          AND s.close <= s.day_open * (1.0 - {fall_pct:?} / 100.0)",
                    end = clock_literal(window_end(*within_minutes)),
                ),
            ),
            EntryPattern::FixedTime { time } => first_bar_per_day(
                "s.open AS entry_price,
               NULL AS rise_pct,
               NULL AS fall_pct",
                &format!("s.bar_time >= {}", clock_literal(*time)),
            ),
        }
    }
}

/// Earliest session bar per trade date passing `filter`, ranked with a
/// window so the bars are scanned once.
fn first_bar_per_day(columns: &str, filter: &str) -> String {
    format!(
        "SELECT trade_date, entry_time, entry_price, rise_pct, fall_pct
    FROM (
        SELECT s.trade_date, s.bar_time AS entry_time,
               {columns},
               ROW_NUMBER() OVER (PARTITION BY s.trade_date ORDER BY s.bar_time) AS hit_rank
        FROM session_bars s
        WHERE {filter}
    )
    WHERE hit_rank = 1"
    )
}

impl ExitPattern {
    pub fn from_config(config: &dyn ConfigPort, section: &str) -> Result<Self, ScreenerError> {
        let name = pattern_name(config, section)?;
        match name.as_str() {
            "fixed_time" => {
                check_options(config, section, &["time"])?;
                Ok(ExitPattern::FixedTime {
                    time: time_option(config, section, "time")?,
                })
            }
            "max_hold" => {
                check_options(config, section, &["minutes"])?;
                Ok(ExitPattern::MaxHold {
                    minutes: minutes_option(config, section, "minutes", 30)?,
                })
            }
            other => Err(ScreenerError::UnknownPattern {
                role: "exit".to_string(),
                name: other.to_string(),
                expected: EXIT_PATTERNS.join(", "),
            }),
        }
    }

    /// First bar after entry at or past the exit target, falling back to the
    /// last bar of the session.
    pub fn detect(&self, day: &[&Bar], entry_time: NaiveTime) -> Option<ExitHit> {
        let target = match self {
            ExitPattern::FixedTime { time } => *time,
            ExitPattern::MaxHold { minutes } => entry_time + Duration::minutes(i64::from(*minutes)),
        };
        let after_entry = || day.iter().filter(|b| b.time() > entry_time);
        after_entry()
            .find(|b| b.time() >= target)
            .or_else(|| after_entry().last())
            .map(|b| ExitHit {
                time: b.time(),
                price: b.close,
            })
    }
}

impl PatternSpec for ExitPattern {
    fn name(&self) -> &'static str {
        match self {
            ExitPattern::FixedTime { .. } => "fixed_time",
            ExitPattern::MaxHold { .. } => "max_hold",
        }
    }

    fn describe(&self) -> String {
        match self {
            ExitPattern::FixedTime { time } => {
                format!("Exit at the close of the first bar at or after {}", time.format("%H:%M"))
            }
            ExitPattern::MaxHold { minutes } => {
                format!("Exit at the close of the first bar {minutes} minutes or more after entry")
            }
        }
    }

    fn to_query_fragment(&self) -> String {
        let target = match self {
            ExitPattern::FixedTime { time } => clock_literal(*time),
            ExitPattern::MaxHold { minutes } => format!("time(e.entry_time, '+{minutes} minutes')"),
        };
        // First bar at or past the target, else the day's last bar after entry.
        format!(
            "SELECT trade_date, exit_time, exit_price
    FROM (
        SELECT e.trade_date, s.bar_time AS exit_time, s.close AS exit_price,
               ROW_NUMBER() OVER (
                   PARTITION BY e.trade_date
                   ORDER BY s.bar_time >= {target} DESC,
                            CASE WHEN s.bar_time >= {target} THEN s.bar_time END,
                            s.bar_time DESC
               ) AS hit_rank
        FROM entry_hits e
        JOIN session_bars s ON s.trade_date = e.trade_date AND s.bar_time > e.entry_time
    )
    WHERE hit_rank = 1"
        )
    }
}

/// Optional fixed-percentage risk levels attached to every candidate row.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RiskLevels {
    pub stop_loss_pct: Option<f64>,
    pub profit_target_pct: Option<f64>,
}

impl RiskLevels {
    pub fn stop_loss_price(&self, direction: Direction, entry: f64) -> Option<f64> {
        self.stop_loss_pct.map(|pct| match direction {
            Direction::Long => entry * (1.0 - pct / 100.0),
            Direction::Short => entry * (1.0 + pct / 100.0),
        })
    }

    pub fn profit_target_price(&self, direction: Direction, entry: f64) -> Option<f64> {
        self.profit_target_pct.map(|pct| match direction {
            Direction::Long => entry * (1.0 + pct / 100.0),
            Direction::Short => entry * (1.0 - pct / 100.0),
        })
    }
}

/// Detect candidates directly over bars, producing the same row shape as the
/// SQL query. Used when the bar source has no query engine.
pub fn scan_candidates(
    bars: &[Bar],
    entry: &EntryPattern,
    exit: &ExitPattern,
    direction: Direction,
    risk: &RiskLevels,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<RawRow> {
    let days = regular_session_days(bars);
    let mut rows = Vec::new();
    for (date, day) in days.range(start..=end) {
        let Some(hit) = entry.detect(day) else {
            continue;
        };
        let Some(out) = exit.detect(day, hit.time) else {
            continue;
        };

        let mut row = RawRow::new();
        row.insert("trade_date".into(), RowValue::from(date.format("%Y-%m-%d").to_string()));
        row.insert("year".into(), RowValue::from(i64::from(chrono::Datelike::year(date))));
        row.insert("entry_time".into(), RowValue::from(hit.time.format("%H:%M:%S").to_string()));
        row.insert("entry_price".into(), RowValue::from(hit.price));
        row.insert("exit_time".into(), RowValue::from(out.time.format("%H:%M:%S").to_string()));
        row.insert("exit_price".into(), RowValue::from(out.price));
        if let Some(pct) = hit.rise_pct {
            row.insert("rise_pct".into(), RowValue::from(pct));
        }
        if let Some(pct) = hit.fall_pct {
            row.insert("fall_pct".into(), RowValue::from(pct));
        }
        row.insert("direction".into(), RowValue::from(direction.as_str()));
        if let Some(price) = risk.stop_loss_price(direction, hit.price) {
            row.insert("stop_loss_price".into(), RowValue::from(price));
        }
        if let Some(price) = risk.profit_target_price(direction, hit.price) {
            row.insert("profit_target_price".into(), RowValue::from(price));
        }
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use chrono::NaiveDateTime;

    fn bar(ts: &str, open: f64, close: f64) -> Bar {
        Bar {
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            open,
            high: open.max(close) + 0.1,
            low: open.min(close) - 0.1,
            close,
            volume: Some(1000),
        }
    }

    fn day() -> Vec<Bar> {
        vec![
            bar("2024-03-01 09:30", 100.0, 100.1),
            bar("2024-03-01 09:35", 100.1, 100.2),
            bar("2024-03-01 09:40", 100.2, 100.4),
            bar("2024-03-01 09:45", 100.4, 100.1),
            bar("2024-03-01 10:00", 100.1, 99.5),
            bar("2024-03-01 15:55", 99.5, 99.8),
        ]
    }

    fn t(s: &str) -> NaiveTime {
        parse_clock(s).unwrap()
    }

    #[test]
    fn quick_rise_finds_first_qualifying_bar() {
        let bars = day();
        let refs: Vec<&Bar> = bars.iter().collect();
        let pattern = EntryPattern::QuickRise {
            rise_pct: 0.3,
            within_minutes: 15,
        };
        let hit = pattern.detect(&refs).unwrap();
        assert_eq!(hit.time, t("09:40"));
        assert_eq!(hit.price, 100.4);
        assert!((hit.rise_pct.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(hit.fall_pct, None);
    }

    #[test]
    fn quick_rise_respects_window() {
        let bars = day();
        let refs: Vec<&Bar> = bars.iter().collect();
        let pattern = EntryPattern::QuickRise {
            rise_pct: 0.3,
            within_minutes: 5,
        };
        assert!(pattern.detect(&refs).is_none());
    }

    #[test]
    fn quick_fall_mirrors_rise() {
        let bars = day();
        let refs: Vec<&Bar> = bars.iter().collect();
        let pattern = EntryPattern::QuickFall {
            fall_pct: 0.4,
            within_minutes: 60,
        };
        let hit = pattern.detect(&refs).unwrap();
        assert_eq!(hit.time, t("10:00"));
        assert!((hit.fall_pct.unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fixed_time_entry_uses_open() {
        let bars = day();
        let refs: Vec<&Bar> = bars.iter().collect();
        let hit = EntryPattern::FixedTime { time: t("09:42") }.detect(&refs).unwrap();
        assert_eq!(hit.time, t("09:45"));
        assert_eq!(hit.price, 100.4);
    }

    #[test]
    fn exit_falls_back_to_last_bar() {
        let bars = day();
        let refs: Vec<&Bar> = bars.iter().collect();
        let hit = ExitPattern::MaxHold { minutes: 30 }.detect(&refs, t("09:40")).unwrap();
        assert_eq!(hit.time, t("15:55"));

        let hit = ExitPattern::MaxHold { minutes: 5 }.detect(&refs, t("09:40")).unwrap();
        assert_eq!(hit.time, t("09:45"));
        assert_eq!(hit.price, 100.1);

        assert!(ExitPattern::FixedTime { time: t("15:00") }.detect(&refs, t("15:55")).is_none());
    }

    #[test]
    fn scan_builds_rows_with_risk_levels() {
        let rows = scan_candidates(
            &day(),
            &EntryPattern::QuickRise {
                rise_pct: 0.3,
                within_minutes: 15,
            },
            &ExitPattern::FixedTime { time: t("15:50") },
            Direction::Long,
            &RiskLevels {
                stop_loss_pct: Some(0.5),
                profit_target_pct: None,
            },
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["entry_time"], RowValue::from("09:40:00"));
        assert_eq!(row["exit_time"], RowValue::from("15:55:00"));
        assert_eq!(row["direction"], RowValue::from("long"));
        assert!(row.contains_key("stop_loss_price"));
        assert!(!row.contains_key("profit_target_price"));
        assert!(!row.contains_key("fall_pct"));
    }

    #[test]
    fn scan_skips_days_outside_range() {
        let rows = scan_candidates(
            &day(),
            &EntryPattern::FixedTime { time: t("09:30") },
            &ExitPattern::MaxHold { minutes: 5 },
            Direction::Short,
            &RiskLevels::default(),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn from_config_validates_option_set() {
        let ok = FileConfigAdapter::from_string(
            "[entry]\npattern = quick_rise\nrise_pct = 0.3\nwithin_minutes = 10\n",
        )
        .unwrap();
        assert_eq!(
            EntryPattern::from_config(&ok, "entry").unwrap(),
            EntryPattern::QuickRise {
                rise_pct: 0.3,
                within_minutes: 10
            }
        );

        let stray =
            FileConfigAdapter::from_string("[entry]\npattern = quick_rise\nrise_pct = 0.3\nfall_pct = 1\n")
                .unwrap();
        let err = EntryPattern::from_config(&stray, "entry").unwrap_err();
        assert!(matches!(err, ScreenerError::ConfigInvalid { ref key, .. } if key == "fall_pct"));

        let unknown = FileConfigAdapter::from_string("[exit]\npattern = trailing\n").unwrap();
        assert!(matches!(
            ExitPattern::from_config(&unknown, "exit"),
            Err(ScreenerError::UnknownPattern { .. })
        ));

        let missing = FileConfigAdapter::from_string("[entry]\npattern = quick_fall\n").unwrap();
        assert!(matches!(
            EntryPattern::from_config(&missing, "entry"),
            Err(ScreenerError::ConfigMissing { .. })
        ));

        let outside = FileConfigAdapter::from_string("[exit]\npattern = fixed_time\ntime = 17:00\n").unwrap();
        assert!(matches!(
            ExitPattern::from_config(&outside, "exit"),
            Err(ScreenerError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn fragments_embed_options() {
        let rise = EntryPattern::QuickRise {
            rise_pct: 0.3,
            within_minutes: 15,
        };
        let sql = rise.to_query_fragment();
        assert!(sql.contains("s.bar_time <= '09:45:00'"));
        assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY s.trade_date"));
        assert!(!sql.contains("MIN("));
        assert!(sql.contains("(1.0 + 0.3 / 100.0)"));

        let hold = ExitPattern::MaxHold { minutes: 45 }.to_query_fragment();
        assert!(hold.contains("time(e.entry_time, '+45 minutes')"));
        assert!(!hold.contains("MAX("));
        assert_eq!(rise.name(), "quick_rise");
        assert!(rise.describe().contains("0.3%"));
    }
}
