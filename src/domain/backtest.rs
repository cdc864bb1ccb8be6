//! Backtest orchestrator.
//!
//! Candidates are processed one at a time in the order supplied. Recoverable
//! failures are isolated to their candidate and counted; fatal ones end the
//! run. Statistics are finalized exactly once, after the loop.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bar::{Bar, DailyBar};
use super::config::BacktestConfig;
use super::error::ScreenerError;
use super::market_metrics::MarketMetrics;
use super::pattern::{scan_candidates, PatternSpec};
use super::query::build_query;
use super::row::RawRow;
use super::screen::{screen_candidate, LlmScreen};
use super::stats::TotalStats;
use super::trade::{map_trade, Candidate};
use crate::ports::chart_port::{ChartPort, ChartRequest};
use crate::ports::data_port::DataPort;
use crate::ports::llm_port::LlmRequest;
use crate::ports::output_port::{CandidateReport, OutputPort};
use crate::ports::query_port::QueryPort;

/// Calendar days fetched before the first candidate day, enough for twenty
/// trading days of SMA history.
pub const SMA_LOOKBACK_DAYS: i64 = 45;

/// Collaborators of one run. Absent chart or output ports skip those steps.
pub struct BacktestPorts<'a> {
    pub data: &'a dyn DataPort,
    pub chart: Option<&'a dyn ChartPort>,
    pub output: Option<&'a dyn OutputPort>,
    pub screen: Option<&'a LlmScreen>,
}

/// `{ticker}_{pattern}_{YYYY-MM-DD}_{HHMM}`
pub fn artifact_stem(ticker: &str, pattern: &str, at: NaiveDateTime) -> String {
    format!(
        "{}_{}_{}_{}",
        ticker,
        pattern,
        at.format("%Y-%m-%d"),
        at.format("%H%M")
    )
}

fn query_error(config: &BacktestConfig, err: ScreenerError) -> ScreenerError {
    match err {
        ScreenerError::QueryExecution { .. } => err,
        other => ScreenerError::QueryExecution {
            ticker: config.ticker.clone(),
            start: config.start_date,
            end: config.end_date,
            entry_pattern: config.entry.name().to_string(),
            exit_pattern: config.exit.name().to_string(),
            reason: other.to_string(),
        },
    }
}

/// Produce the raw candidate rows for a run: through the query engine when
/// one is available, otherwise by scanning bars directly.
pub fn collect_candidates(
    config: &BacktestConfig,
    query: Option<&dyn QueryPort>,
    data: &dyn DataPort,
) -> Result<Vec<RawRow>, ScreenerError> {
    let rows = match query {
        Some(engine) => {
            let sql = build_query(config);
            debug!(sql = %sql, "executing pattern query");
            engine.execute(&sql)
        }
        None => data
            .fetch_bars(&config.ticker, config.timeframe, config.start_date, config.end_date)
            .map(|bars| {
                scan_candidates(
                    &bars,
                    &config.entry,
                    &config.exit,
                    config.direction,
                    &config.risk,
                    config.start_date,
                    config.end_date,
                )
            }),
    };
    let rows = rows.map_err(|e| query_error(config, e))?;
    info!(
        ticker = %config.ticker,
        entry = config.entry.name(),
        exit = config.exit.name(),
        matches = rows.len(),
        "pattern matches found"
    );
    Ok(rows)
}

/// Per-run state shared by every candidate.
struct RunContext<'a> {
    config: &'a BacktestConfig,
    bars: &'a [Bar],
    daily: Option<&'a [DailyBar]>,
    raw_config: serde_json::Value,
    pattern: String,
}

pub async fn run_backtest(
    config: &BacktestConfig,
    rows: Vec<RawRow>,
    ports: &BacktestPorts<'_>,
    cancel: &CancellationToken,
) -> Result<TotalStats, ScreenerError> {
    let mut stats = TotalStats::new();
    stats.total_raw_matches = rows.len();

    let history_start = config.start_date - Duration::days(SMA_LOOKBACK_DAYS);
    let mut bars = ports
        .data
        .fetch_bars(&config.ticker, config.timeframe, history_start, config.end_date)
        .map_err(|e| query_error(config, e))?;
    bars.sort_by_key(|b| b.timestamp);

    let daily = match ports
        .data
        .fetch_daily_bars(&config.ticker, history_start, config.end_date)
    {
        Ok(daily) => daily,
        Err(e) => {
            warn!(ticker = %config.ticker, error = %e, "daily series unavailable, deriving from intraday bars");
            None
        }
    };

    let ctx = RunContext {
        config,
        bars: &bars,
        daily: daily.as_deref(),
        raw_config: config.to_json(),
        pattern: config.entry.name().to_string(),
    };

    info!(
        ticker = %config.ticker,
        start = %config.start_date,
        end = %config.end_date,
        candidates = rows.len(),
        screen = ports.screen.is_some_and(|s| s.is_enabled()),
        "starting backtest"
    );

    for (index, row) in rows.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ScreenerError::Cancelled);
        }
        match process_candidate(&ctx, row, ports, cancel, &mut stats).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(candidate = index, error = %e, "candidate failed, continuing");
                stats.failed_candidates += 1;
            }
        }
    }

    stats.total_trading_days = count_trading_days(&bars, config.start_date, config.end_date);
    stats.finalize();

    info!(
        confirmed = stats.total_llm_confirmed_trades,
        rejected = stats.rejected_candidates,
        failed = stats.failed_candidates,
        llm_cost = stats.grand_total_llm_cost,
        "backtest complete"
    );

    if let Some(output) = ports.output {
        if let Err(e) = output.write_summary(config, &stats) {
            warn!(error = %e, "failed to write summary");
        }
    }

    Ok(stats)
}

async fn process_candidate(
    ctx: &RunContext<'_>,
    row: &RawRow,
    ports: &BacktestPorts<'_>,
    cancel: &CancellationToken,
    stats: &mut TotalStats,
) -> Result<(), ScreenerError> {
    let config = ctx.config;
    let candidate = Candidate::from_row(row, config.direction)?;
    let signal = candidate.entry_signal();
    let stem = artifact_stem(&config.ticker, &ctx.pattern, signal.timestamp);

    let window = context_window(ctx.bars, &candidate);
    let metrics = MarketMetrics::generate(window, &signal, ctx.daily, config.metrics);
    debug!(candidate = %stem, context = %metrics.price_line, "market context");

    let chart_path = match ports.chart {
        Some(chart) if config.wants_chart() => {
            let today: Vec<Bar> = window
                .iter()
                .filter(|b| b.date() == candidate.trade_date && b.is_regular_session())
                .cloned()
                .collect();
            let request = ChartRequest {
                ticker: &config.ticker,
                pattern: &ctx.pattern,
                bars: &today,
                signal: &signal,
                previous_close: metrics.previous_close,
                show_vwap: config.charts.show_vwap && !config.metrics.suppress_vwap,
                show_prev_close: config.charts.show_prev_close,
                path: config
                    .charts
                    .output_dir
                    .join(format!("{stem}.{}", config.charts.format.extension())),
            };
            Some(chart.render(&request)?)
        }
        _ => None,
    };

    let request = LlmRequest {
        ticker: config.ticker.clone(),
        pattern: config.pattern_label(),
        signal: signal.clone(),
        chart_path: chart_path.clone(),
        screen_config: config.screen.clone(),
        raw_config: ctx.raw_config.clone(),
        context: config.screen.context.clone(),
        debug: config.debug,
        market_metrics_text: config
            .screen
            .include_market_context
            .then(|| metrics.prompt_text.clone()),
    };

    let decision = screen_candidate(ports.screen, request, cancel).await?;
    stats.add_llm_cost(decision.cost);

    let trade = if decision.proceed {
        let direction = decision.direction.unwrap_or(candidate.direction);
        let chart: Option<PathBuf> = decision.chart_path.clone().or(chart_path);
        Some(
            map_trade(row, direction, chart.as_deref())?
                .with_screen_levels(decision.averaged_stop_loss, decision.averaged_profit_target),
        )
    } else {
        None
    };

    if config.output.write_candidates {
        if let Some(output) = ports.output {
            let report = CandidateReport {
                ticker: &config.ticker,
                pattern: &ctx.pattern,
                stem: &stem,
                candidate: &candidate,
                metrics: &metrics,
                decision: &decision,
                trade: trade.as_ref(),
            };
            if let Err(e) = output.write_candidate(&report) {
                warn!(candidate = %stem, error = %e, "failed to write candidate report");
            }
        }
    }

    match trade {
        Some(trade) => {
            info!(
                candidate = %stem,
                direction = %trade.direction,
                return_pct = trade.return_pct,
                cost = decision.cost,
                "candidate confirmed"
            );
            stats.record_trade(trade);
        }
        None => {
            info!(
                candidate = %stem,
                cost = decision.cost,
                rationale = decision.rationale.as_deref().unwrap_or(""),
                "candidate rejected"
            );
            stats.rejected_candidates += 1;
        }
    }
    Ok(())
}

/// Bars from the SMA lookback through the candidate's entry, inclusive.
/// `bars` must be sorted by timestamp.
fn context_window<'a>(bars: &'a [Bar], candidate: &Candidate) -> &'a [Bar] {
    let from = candidate.trade_date - Duration::days(SMA_LOOKBACK_DAYS);
    let entry = candidate.entry_timestamp();
    let start = bars.partition_point(|b| b.date() < from);
    let end = bars.partition_point(|b| b.timestamp <= entry);
    &bars[start..end.max(start)]
}

fn count_trading_days(bars: &[Bar], start: NaiveDate, end: NaiveDate) -> usize {
    bars.iter()
        .filter(|b| b.is_regular_session())
        .map(|b| b.date())
        .filter(|d| *d >= start && *d <= end)
        .collect::<BTreeSet<_>>()
        .len()
}
