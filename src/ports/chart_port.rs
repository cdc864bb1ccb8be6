//! Chart rendering port trait.

use std::path::PathBuf;

use crate::domain::bar::Bar;
use crate::domain::error::ScreenerError;
use crate::domain::signal::Signal;

/// One chart: the context window around a candidate's entry.
#[derive(Debug, Clone)]
pub struct ChartRequest<'a> {
    pub ticker: &'a str,
    pub pattern: &'a str,
    /// Regular-session bars up to and including the entry.
    pub bars: &'a [Bar],
    pub signal: &'a Signal,
    pub previous_close: Option<f64>,
    pub show_vwap: bool,
    pub show_prev_close: bool,
    /// Target file; the adapter may only change the extension.
    pub path: PathBuf,
}

pub trait ChartPort: Send + Sync {
    fn render(&self, request: &ChartRequest<'_>) -> Result<PathBuf, ScreenerError>;
}
