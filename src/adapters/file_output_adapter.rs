//! File output: per-candidate text artifacts, a trades CSV and the run summary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::config::BacktestConfig;
use crate::domain::error::ScreenerError;
use crate::domain::pattern::PatternSpec;
use crate::domain::stats::{DirectionSummary, TotalStats};
use crate::domain::signal::Direction;
use crate::ports::output_port::{CandidateReport, OutputPort};

pub const SUMMARY_FILE: &str = "summary.txt";
pub const TRADES_FILE: &str = "trades.csv";

pub struct FileOutputAdapter {
    dir: PathBuf,
}

fn write_err(path: &Path, reason: impl std::fmt::Display) -> ScreenerError {
    ScreenerError::OutputWrite {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn pct(value: f64) -> String {
    format!("{:+.3}%", value * 100.0)
}

impl FileOutputAdapter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn ensure_dir(&self) -> Result<(), ScreenerError> {
        fs::create_dir_all(&self.dir).map_err(|e| write_err(&self.dir, e))
    }

    fn write_trades_csv(&self, stats: &TotalStats) -> Result<(), ScreenerError> {
        let path = self.dir.join(TRADES_FILE);
        let mut wtr = csv::Writer::from_path(&path).map_err(|e| write_err(&path, e))?;
        for trade in stats.long_stats.trades.iter().chain(&stats.short_stats.trades) {
            wtr.serialize(trade).map_err(|e| write_err(&path, e))?;
        }
        wtr.flush().map_err(|e| write_err(&path, e))
    }
}

pub fn render_candidate(report: &CandidateReport<'_>) -> String {
    let c = report.candidate;
    let d = report.decision;
    let mut out = String::new();
    out.push_str(&format!("{} {} {}\n", report.ticker, report.pattern, c.trade_date));
    out.push_str(&format!(
        "Entry: {} @ ${:.2}  Exit: {} @ ${:.2}  Direction: {}\n",
        c.entry_time.format("%H:%M"),
        c.entry_price,
        c.exit_time.format("%H:%M"),
        c.exit_price,
        c.direction
    ));
    if let Some(rise) = c.rise_pct {
        out.push_str(&format!("Rise from open: {rise:.2}%\n"));
    }
    if let Some(fall) = c.fall_pct {
        out.push_str(&format!("Fall from open: {fall:.2}%\n"));
    }
    out.push('\n');
    out.push_str(&format!("{}\n", report.metrics.price_line));
    out.push_str(&format!("{}\n", report.metrics.indicator_line));
    out.push('\n');

    let verdict = if d.proceed { "CONFIRMED" } else { "REJECTED" };
    out.push_str(&format!("Decision: {verdict}  Cost: ${:.4}\n", d.cost));
    if let Some(direction) = d.direction {
        out.push_str(&format!("Screen direction: {direction}\n"));
    }
    if let Some(stop) = d.averaged_stop_loss {
        out.push_str(&format!("Proposed stop loss: ${stop:.2}\n"));
    }
    if let Some(target) = d.averaged_profit_target {
        out.push_str(&format!("Proposed profit target: ${target:.2}\n"));
    }
    if let Some(rationale) = &d.rationale {
        out.push_str(&format!("Rationale: {rationale}\n"));
    }
    if let Some(path) = &d.chart_path {
        out.push_str(&format!("Chart: {}\n", path.display()));
    }
    if let Some(trade) = report.trade {
        out.push_str(&format!("Return: {}\n", pct(trade.return_pct)));
    }
    if let Some(calls) = &d.debug {
        out.push_str("\nCalls:\n");
        for call in calls {
            out.push_str(&format!("  #{} {} (cost ${:.4})\n", call.index, call.outcome, call.cost));
            if let Some(raw) = &call.raw_response {
                out.push_str(&format!("    {}\n", raw.replace('\n', "\n    ")));
            }
        }
    }
    out
}

fn render_direction(
    out: &mut String,
    direction: Direction,
    summary: &DirectionSummary,
    yearly: &BTreeMap<i32, DirectionSummary>,
) {
    out.push_str(&format!("\n--- {} ---\n", direction.as_str().to_uppercase()));
    if summary.total_trades == 0 {
        out.push_str("No trades\n");
        return;
    }
    out.push_str(&format!(
        "Trades:        {} (won {}, lost {})\n",
        summary.total_trades, summary.winning_trades, summary.losing_trades
    ));
    out.push_str(&format!("Win rate:      {:.1}%\n", summary.win_rate * 100.0));
    out.push_str(&format!("Mean return:   {}\n", pct(summary.mean_return)));
    out.push_str(&format!("Median return: {}\n", pct(summary.median_return)));
    out.push_str(&format!("Std dev:       {:.3}%\n", summary.std_dev_return * 100.0));
    for (year, s) in yearly {
        out.push_str(&format!(
            "  {}: {} trades, {:.1}% win, mean {}\n",
            year,
            s.total_trades,
            s.win_rate * 100.0,
            pct(s.mean_return)
        ));
    }
}

pub fn render_summary(config: &BacktestConfig, stats: &TotalStats) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== {} {} ({} to {}) ===\n",
        config.ticker,
        config.pattern_label(),
        config.start_date,
        config.end_date
    ));
    out.push_str(&format!("Entry: {}\n", config.entry.describe()));
    out.push_str(&format!("Exit:  {}\n", config.exit.describe()));
    out.push('\n');
    out.push_str(&format!("Trading days:       {}\n", stats.total_trading_days));
    out.push_str(&format!("Pattern matches:    {}\n", stats.total_raw_matches));
    out.push_str(&format!("Confirmed trades:   {}\n", stats.total_llm_confirmed_trades));
    out.push_str(&format!("Rejected:           {}\n", stats.rejected_candidates));
    out.push_str(&format!("Failed:             {}\n", stats.failed_candidates));
    out.push_str(&format!("LLM cost:           ${:.4}\n", stats.grand_total_llm_cost));
    render_direction(&mut out, Direction::Long, &stats.long_summary, &stats.long_yearly);
    render_direction(&mut out, Direction::Short, &stats.short_summary, &stats.short_yearly);
    out
}

impl OutputPort for FileOutputAdapter {
    fn write_candidate(&self, report: &CandidateReport<'_>) -> Result<PathBuf, ScreenerError> {
        self.ensure_dir()?;
        let path = self.dir.join(format!("{}.txt", report.stem));
        fs::write(&path, render_candidate(report)).map_err(|e| write_err(&path, e))?;
        Ok(path)
    }

    fn write_summary(&self, config: &BacktestConfig, stats: &TotalStats) -> Result<(), ScreenerError> {
        self.ensure_dir()?;
        let path = self.dir.join(SUMMARY_FILE);
        fs::write(&path, render_summary(config, stats)).map_err(|e| write_err(&path, e))?;
        self.write_trades_csv(stats)
    }
}
