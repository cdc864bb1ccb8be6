//! Pattern query assembly.
//!
//! The query returns one row per matching trade date with the columns
//! `trade_date, year, entry_time, entry_price, exit_time, exit_price,
//! rise_pct, fall_pct, direction` plus optional risk-level columns. Values
//! are embedded as literals; the ticker is quote-escaped.
//!
//! Session bars are materialized once and ranked with window functions; the
//! timestamp range is a plain comparison on `ts` so the bars index applies.

use super::config::BacktestConfig;
use super::pattern::{PatternSpec, RiskLevels};
use super::signal::Direction;

pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn risk_columns(risk: &RiskLevels, direction: Direction) -> String {
    let (stop_sign, target_sign) = match direction {
        Direction::Long => ('-', '+'),
        Direction::Short => ('+', '-'),
    };
    let mut columns = String::new();
    if let Some(pct) = risk.stop_loss_pct {
        columns.push_str(&format!(
            ",\n       e.entry_price * (1.0 {stop_sign} {pct:?} / 100.0) AS stop_loss_price"
        ));
    }
    if let Some(pct) = risk.profit_target_pct {
        columns.push_str(&format!(
            ",\n       e.entry_price * (1.0 {target_sign} {pct:?} / 100.0) AS profit_target_price"
        ));
    }
    columns
}

pub fn build_query(config: &BacktestConfig) -> String {
    format!(
        "WITH session_bars AS MATERIALIZED (
    SELECT trade_date, bar_time, open, high, low, close, volume,
           FIRST_VALUE(open) OVER (PARTITION BY trade_date ORDER BY bar_time) AS day_open
    FROM (
        SELECT date(ts) AS trade_date, time(ts) AS bar_time, open, high, low, close, volume
        FROM bars
        WHERE ticker = {ticker}
          AND timeframe = {timeframe}
          AND ts BETWEEN {start} AND {end}
    )
    WHERE bar_time >= '09:30:00' AND bar_time < '16:00:00'
),
entry_hits AS MATERIALIZED (
    {entry}
),
exit_hits AS (
    {exit}
)
SELECT e.trade_date AS trade_date,
       CAST(strftime('%Y', e.trade_date) AS INTEGER) AS year,
       e.entry_time AS entry_time,
       e.entry_price AS entry_price,
       x.exit_time AS exit_time,
       x.exit_price AS exit_price,
       e.rise_pct AS rise_pct,
       e.fall_pct AS fall_pct,
       {direction} AS direction{risk}
FROM entry_hits e
JOIN exit_hits x ON x.trade_date = e.trade_date
ORDER BY e.trade_date",
        ticker = sql_literal(&config.ticker),
        timeframe = sql_literal(config.timeframe.as_str()),
        start = sql_literal(&config.start_date.format("%Y-%m-%d 00:00:00").to_string()),
        end = sql_literal(&config.end_date.format("%Y-%m-%d 23:59:59").to_string()),
        entry = config.entry.to_query_fragment(),
        exit = config.exit.to_query_fragment(),
        direction = sql_literal(config.direction.as_str()),
        risk = risk_columns(&config.risk, config.direction),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::domain::config_validation::{build_backtest_config, ConfigOverrides};

    fn config(extra: &str) -> BacktestConfig {
        let content = format!(
            "[backtest]\nticker = O'NEIL\nstart_date = 2024-01-01\nend_date = 2024-01-31\n{extra}\n\
             [entry]\npattern = quick_fall\nfall_pct = 1.5\n\
             [exit]\npattern = max_hold\nminutes = 60\n"
        );
        let adapter = FileConfigAdapter::from_string(&content).unwrap();
        build_backtest_config(&adapter, &ConfigOverrides::default()).unwrap()
    }

    #[test]
    fn escapes_ticker_and_embeds_range() {
        let sql = build_query(&config(""));
        assert!(sql.contains("ticker = 'O''NEIL'"));
        assert!(sql.contains("ts BETWEEN '2024-01-01 00:00:00' AND '2024-01-31 23:59:59'"));
        assert!(sql.contains("AS MATERIALIZED"));
        assert!(sql.contains("timeframe = '1m'"));
        assert!(sql.contains("'long' AS direction"));
        assert!(sql.contains("(1.0 - 1.5 / 100.0)"));
        assert!(sql.contains("'+60 minutes'"));
        assert!(!sql.contains("stop_loss_price"));
    }

    #[test]
    fn short_risk_levels_invert() {
        let sql = build_query(&config(
            "direction = short\n[risk]\nstop_loss_pct = 0.5\nprofit_target_pct = 1.0\n",
        ));
        assert!(sql.contains("e.entry_price * (1.0 + 0.5 / 100.0) AS stop_loss_price"));
        assert!(sql.contains("e.entry_price * (1.0 - 1.0 / 100.0) AS profit_target_price"));
        assert!(sql.contains("'short' AS direction"));
    }
}
