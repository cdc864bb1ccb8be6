//! Per-direction trade statistics and the run-level aggregate.

use serde::Serialize;
use std::collections::BTreeMap;

use super::signal::Direction;
use super::trade::Trade;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DirectionStats {
    /// Confirmed trades in processing order.
    pub trades: Vec<Trade>,
    pub winning_trades: usize,
    pub total_return_sum: f64,
    pub all_returns: Vec<f64>,
}

impl DirectionStats {
    pub fn record(&mut self, trade: Trade) {
        if trade.is_win() {
            self.winning_trades += 1;
        }
        self.total_return_sum += trade.return_pct;
        self.all_returns.push(trade.return_pct);
        self.trades.push(trade);
    }

    pub fn losing_trades(&self) -> usize {
        self.trades.len() - self.winning_trades
    }

    pub fn summarize(&self) -> DirectionSummary {
        DirectionSummary::compute(self.winning_trades, self.total_return_sum, &self.all_returns)
    }

    /// Per-year breakdown, ordered by year.
    pub fn yearly(&self) -> BTreeMap<i32, DirectionSummary> {
        let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
        for trade in &self.trades {
            by_year.entry(trade.year).or_default().push(trade.return_pct);
        }
        by_year
            .into_iter()
            .map(|(year, returns)| {
                let wins = returns.iter().filter(|&&r| r > 0.0).count();
                let sum = returns.iter().sum();
                (year, DirectionSummary::compute(wins, sum, &returns))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DirectionSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub mean_return: f64,
    pub median_return: f64,
    pub std_dev_return: f64,
}

impl DirectionSummary {
    /// Empty input yields zero for every derived figure.
    pub fn compute(winning: usize, return_sum: f64, returns: &[f64]) -> Self {
        let total = returns.len();
        if total == 0 {
            return DirectionSummary::default();
        }
        let n = total as f64;
        let mean = return_sum / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

        DirectionSummary {
            total_trades: total,
            winning_trades: winning,
            losing_trades: total - winning,
            win_rate: winning as f64 / n,
            mean_return: mean,
            median_return: median(returns),
            std_dev_return: variance.sqrt(),
        }
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Run-level aggregate. Created once per run, mutated by the orchestrator,
/// finalized once at the end.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TotalStats {
    pub long_stats: DirectionStats,
    pub short_stats: DirectionStats,
    pub total_trading_days: usize,
    pub total_raw_matches: usize,
    pub grand_total_llm_cost: f64,
    /// Candidates the screen declined.
    pub rejected_candidates: usize,
    /// Candidates abandoned after a recoverable error.
    pub failed_candidates: usize,

    pub total_llm_confirmed_trades: usize,
    pub long_summary: DirectionSummary,
    pub short_summary: DirectionSummary,
    pub long_yearly: BTreeMap<i32, DirectionSummary>,
    pub short_yearly: BTreeMap<i32, DirectionSummary>,
}

impl TotalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(&self, direction: Direction) -> &DirectionStats {
        match direction {
            Direction::Long => &self.long_stats,
            Direction::Short => &self.short_stats,
        }
    }

    pub fn record_trade(&mut self, trade: Trade) {
        match trade.direction {
            Direction::Long => self.long_stats.record(trade),
            Direction::Short => self.short_stats.record(trade),
        }
    }

    /// Add one screening's cost. Negative or non-finite amounts are ignored so
    /// the running total never decreases.
    pub fn add_llm_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.grand_total_llm_cost += cost;
        }
    }

    pub fn confirmed_trades(&self) -> usize {
        self.long_stats.trades.len() + self.short_stats.trades.len()
    }

    /// Confirmed, rejected and failed candidates together.
    pub fn accounted_candidates(&self) -> usize {
        self.confirmed_trades() + self.rejected_candidates + self.failed_candidates
    }

    /// Recompute every derived field from the accumulators.
    pub fn finalize(&mut self) {
        self.total_llm_confirmed_trades = self.confirmed_trades();
        self.long_summary = self.long_stats.summarize();
        self.short_summary = self.short_stats.summarize();
        self.long_yearly = self.long_stats.yearly();
        self.short_yearly = self.short_stats.yearly();
    }
}
