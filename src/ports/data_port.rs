//! Bar source port trait.

use crate::domain::bar::{Bar, DailyBar};
use crate::domain::config::Timeframe;
use crate::domain::error::ScreenerError;
use chrono::NaiveDate;

pub trait DataPort: Send + Sync {
    /// Intraday bars for `ticker` whose calendar day falls in `start..=end`,
    /// ordered by timestamp.
    fn fetch_bars(
        &self,
        ticker: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ScreenerError>;

    /// External daily series, when the source has one. Callers derive daily
    /// bars from intraday data otherwise.
    fn fetch_daily_bars(
        &self,
        _ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Option<Vec<DailyBar>>, ScreenerError> {
        Ok(None)
    }
}
