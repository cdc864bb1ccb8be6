//! Configuration building and validation.
//!
//! Everything is checked before the first candidate is processed.

use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::config::{BacktestConfig, ChartFormat, ChartOptions, OutputOptions, Timeframe};
use crate::domain::error::ScreenerError;
use crate::domain::market_metrics::MetricsOptions;
use crate::domain::pattern::{EntryPattern, ExitPattern, RiskLevels};
use crate::domain::screen::ScreenConfig;
use crate::domain::signal::Direction;
use crate::ports::config_port::ConfigPort;

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub ticker: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub debug: bool,
}

pub fn build_backtest_config(
    config: &dyn ConfigPort,
    overrides: &ConfigOverrides,
) -> Result<BacktestConfig, ScreenerError> {
    let ticker = match &overrides.ticker {
        Some(t) => t.trim().to_ascii_uppercase(),
        None => required_string(config, "backtest", "ticker")?.to_ascii_uppercase(),
    };
    let start_date = match overrides.start_date {
        Some(d) => d,
        None => parse_date(config.get_string("backtest", "start_date").as_deref(), "start_date")?,
    };
    let end_date = match overrides.end_date {
        Some(d) => d,
        None => parse_date(config.get_string("backtest", "end_date").as_deref(), "end_date")?,
    };
    validate_dates(start_date, end_date)?;

    let timeframe = match config.get_string("backtest", "timeframe") {
        Some(raw) => raw.parse::<Timeframe>().map_err(|reason| ScreenerError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "timeframe".to_string(),
            reason,
        })?,
        None => Timeframe::OneMinute,
    };
    let direction = match config.get_string("backtest", "direction") {
        Some(raw) => raw.parse::<Direction>().map_err(|reason| ScreenerError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "direction".to_string(),
            reason,
        })?,
        None => Direction::Long,
    };

    let debug = overrides.debug || config.get_bool("backtest", "debug", false);

    Ok(BacktestConfig {
        ticker,
        start_date,
        end_date,
        timeframe,
        direction,
        entry: EntryPattern::from_config(config, "entry")?,
        exit: ExitPattern::from_config(config, "exit")?,
        risk: build_risk(config)?,
        screen: build_screen_config(config, debug)?,
        charts: ChartOptions {
            generate: config.get_bool("charts", "generate", false),
            format: match config.get_string("charts", "format") {
                Some(raw) => raw.parse::<ChartFormat>().map_err(|reason| {
                    ScreenerError::ConfigInvalid {
                        section: "charts".to_string(),
                        key: "format".to_string(),
                        reason,
                    }
                })?,
                None => ChartFormat::default(),
            },
            output_dir: config
                .get_string("charts", "output_dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| ChartOptions::default().output_dir),
            show_vwap: config.get_bool("charts", "show_vwap", true),
            show_prev_close: config.get_bool("charts", "show_prev_close", true),
        },
        metrics: MetricsOptions {
            suppress_sma: config.get_bool("context", "suppress_sma", false),
            suppress_vwap: config.get_bool("context", "suppress_vwap", false),
        },
        output: OutputOptions {
            dir: config
                .get_string("output", "dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| OutputOptions::default().dir),
            write_candidates: config.get_bool("output", "write_candidates", true),
        },
        debug,
    })
}

pub fn build_screen_config(config: &dyn ConfigPort, debug: bool) -> Result<ScreenConfig, ScreenerError> {
    let defaults = ScreenConfig::default();
    let num_calls = config.get_int("llm", "num_calls", defaults.num_calls as i64);
    if !(1..=16).contains(&num_calls) {
        return Err(ScreenerError::ConfigInvalid {
            section: "llm".to_string(),
            key: "num_calls".to_string(),
            reason: "num_calls must be between 1 and 16".to_string(),
        });
    }
    // Threshold defaults to a simple majority of the calls.
    let threshold = config.get_int("llm", "agreement_threshold", num_calls / 2 + 1);
    if threshold < 1 || threshold > num_calls {
        return Err(ScreenerError::ConfigInvalid {
            section: "llm".to_string(),
            key: "agreement_threshold".to_string(),
            reason: format!("agreement_threshold must be between 1 and num_calls ({num_calls})"),
        });
    }
    let timeout_secs = config.get_double("llm", "timeout_secs", defaults.call_timeout.as_secs_f64());
    if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
        return Err(ScreenerError::ConfigInvalid {
            section: "llm".to_string(),
            key: "timeout_secs".to_string(),
            reason: "timeout_secs must be positive".to_string(),
        });
    }

    Ok(ScreenConfig {
        enabled: config.get_bool("llm", "enabled", false),
        num_calls: num_calls as usize,
        agreement_threshold: threshold as usize,
        call_timeout: Duration::from_secs_f64(timeout_secs),
        bill_failed_calls: config.get_bool("llm", "bill_failed_calls", defaults.bill_failed_calls),
        include_market_context: config.get_bool(
            "llm",
            "include_market_context",
            defaults.include_market_context,
        ),
        debug,
        context: config
            .get_string("llm", "context")
            .filter(|c| !c.trim().is_empty()),
    })
}

fn build_risk(config: &dyn ConfigPort) -> Result<RiskLevels, ScreenerError> {
    Ok(RiskLevels {
        stop_loss_pct: optional_pct(config, "risk", "stop_loss_pct")?,
        profit_target_pct: optional_pct(config, "risk", "profit_target_pct")?,
    })
}

fn optional_pct(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, ScreenerError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(None);
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if v > 0.0 && v < 100.0 => Ok(Some(v)),
        _ => Err(ScreenerError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{key} must be a percentage between 0 and 100 (exclusive)"),
        }),
    }
}

fn required_string(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, ScreenerError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(ScreenerError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn validate_dates(start_date: NaiveDate, end_date: NaiveDate) -> Result<(), ScreenerError> {
    if start_date > end_date {
        return Err(ScreenerError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "start_date".to_string(),
            reason: "start_date must not be after end_date".to_string(),
        });
    }
    Ok(())
}

fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate, ScreenerError> {
    match value {
        None => Err(ScreenerError::ConfigMissing {
            section: "backtest".to_string(),
            key: field.to_string(),
        }),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            ScreenerError::ConfigInvalid {
                section: "backtest".to_string(),
                key: field.to_string(),
                reason: format!("invalid {} format, expected YYYY-MM-DD", field),
            }
        }),
    }
}
