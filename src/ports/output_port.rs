//! Result output port trait.

use std::path::PathBuf;

use crate::domain::config::BacktestConfig;
use crate::domain::error::ScreenerError;
use crate::domain::market_metrics::MarketMetrics;
use crate::domain::screen::ScreeningDecision;
use crate::domain::stats::TotalStats;
use crate::domain::trade::{Candidate, Trade};

/// Everything known about one screened candidate.
#[derive(Debug, Clone)]
pub struct CandidateReport<'a> {
    pub ticker: &'a str,
    pub pattern: &'a str,
    /// Deterministic artifact name without extension.
    pub stem: &'a str,
    pub candidate: &'a Candidate,
    pub metrics: &'a MarketMetrics,
    pub decision: &'a ScreeningDecision,
    /// Present when the candidate was confirmed.
    pub trade: Option<&'a Trade>,
}

pub trait OutputPort: Send + Sync {
    fn write_candidate(&self, report: &CandidateReport<'_>) -> Result<PathBuf, ScreenerError>;

    fn write_summary(&self, config: &BacktestConfig, stats: &TotalStats) -> Result<(), ScreenerError>;
}
