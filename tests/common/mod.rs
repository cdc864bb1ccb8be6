#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use intrascreen::adapters::file_config_adapter::FileConfigAdapter;
use intrascreen::domain::bar::{Bar, DailyBar};
use intrascreen::domain::config::{BacktestConfig, Timeframe};
use intrascreen::domain::config_validation::{build_backtest_config, ConfigOverrides};
use intrascreen::domain::error::{LlmCallError, ScreenerError};
use intrascreen::domain::signal::Direction;
use intrascreen::ports::chart_port::{ChartPort, ChartRequest};
use intrascreen::ports::data_port::DataPort;
use intrascreen::ports::llm_port::{LlmClient, LlmRequest, LlmVote};
use intrascreen::ports::output_port::{CandidateReport, OutputPort};
use intrascreen::domain::stats::TotalStats;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// One regular session from 09:30 through 11:00, one bar per minute.
/// Prices drift up by `step` each minute from `open`.
pub fn session(day: &str, open: f64, step: f64) -> Vec<Bar> {
    let start = NaiveDateTime::new(date(day), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    (0..=90)
        .map(|i| {
            let o = open + step * i as f64;
            let c = o + step;
            Bar {
                timestamp: start + Duration::minutes(i),
                open: o,
                high: o.max(c) + 0.05,
                low: o.min(c) - 0.05,
                close: c,
                volume: Some(1_000 + i),
            }
        })
        .collect()
}

/// Sessions for each listed day, in order.
pub fn sessions(days: &[&str]) -> Vec<Bar> {
    days.iter()
        .enumerate()
        .flat_map(|(i, d)| session(d, 100.0 + i as f64, 0.02))
        .collect()
}

pub const WEEK: [&str; 5] = [
    "2024-03-04",
    "2024-03-05",
    "2024-03-06",
    "2024-03-07",
    "2024-03-08",
];

pub const FIXED_TIME_INI: &str = "
[backtest]
ticker = spy
start_date = 2024-03-04
end_date = 2024-03-08
direction = long

[entry]
pattern = fixed_time
time = 10:00

[exit]
pattern = max_hold
minutes = 30
";

pub fn config_from(ini: &str) -> BacktestConfig {
    let adapter = FileConfigAdapter::from_string(ini).unwrap();
    build_backtest_config(&adapter, &ConfigOverrides::default()).unwrap()
}

pub struct MockDataPort {
    pub bars: Vec<Bar>,
    pub daily: Option<Vec<DailyBar>>,
    pub error: Option<String>,
}

impl MockDataPort {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            daily: None,
            error: None,
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            bars: Vec::new(),
            daily: None,
            error: Some(reason.to_string()),
        }
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        _ticker: &str,
        _timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ScreenerError> {
        if let Some(reason) = &self.error {
            return Err(ScreenerError::Database {
                reason: reason.clone(),
            });
        }
        Ok(self
            .bars
            .iter()
            .filter(|b| b.date() >= start && b.date() <= end)
            .cloned()
            .collect())
    }

    fn fetch_daily_bars(
        &self,
        _ticker: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Option<Vec<DailyBar>>, ScreenerError> {
        Ok(self.daily.clone())
    }
}

/// Records requested chart paths without touching the filesystem. Fails
/// for any signal on a date in `fail_dates`.
#[derive(Default)]
pub struct MockChartPort {
    pub fail_dates: Vec<NaiveDate>,
    pub rendered: Mutex<Vec<PathBuf>>,
}

impl ChartPort for MockChartPort {
    fn render(&self, request: &ChartRequest<'_>) -> Result<PathBuf, ScreenerError> {
        if self.fail_dates.contains(&request.signal.date()) {
            return Err(ScreenerError::ChartGeneration {
                ticker: request.ticker.to_string(),
                date: request.signal.date(),
                reason: "renderer crashed".into(),
            });
        }
        self.rendered.lock().unwrap().push(request.path.clone());
        Ok(request.path.clone())
    }
}

/// Answers per signal date, falling back to `default`.
pub struct MockLlmClient {
    pub by_date: HashMap<NaiveDate, Result<LlmVote, LlmCallError>>,
    pub default: Result<LlmVote, LlmCallError>,
    pub delay: std::time::Duration,
    pub calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn always(outcome: Result<LlmVote, LlmCallError>) -> Self {
        Self {
            by_date: HashMap::new(),
            default: outcome,
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, day: &str, outcome: Result<LlmVote, LlmCallError>) -> Self {
        self.by_date.insert(date(day), outcome);
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn proceed(direction: Option<Direction>, cost: f64) -> Result<LlmVote, LlmCallError> {
    Ok(LlmVote {
        proceed: true,
        direction,
        cost,
        rationale: Some("looks good".into()),
        ..Default::default()
    })
}

pub fn decline(cost: f64) -> Result<LlmVote, LlmCallError> {
    Ok(LlmVote {
        proceed: false,
        cost,
        rationale: Some("no edge".into()),
        ..Default::default()
    })
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn confirm(&self, request: &LlmRequest) -> Result<LlmVote, LlmCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.by_date
            .get(&request.signal.date())
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[derive(Default)]
pub struct MockOutputPort {
    pub candidates: Mutex<Vec<String>>,
    pub summaries: AtomicUsize,
    pub fail_candidates: bool,
}

impl OutputPort for MockOutputPort {
    fn write_candidate(&self, report: &CandidateReport<'_>) -> Result<PathBuf, ScreenerError> {
        if self.fail_candidates {
            return Err(ScreenerError::OutputWrite {
                path: report.stem.to_string(),
                reason: "read-only filesystem".into(),
            });
        }
        self.candidates.lock().unwrap().push(report.stem.to_string());
        Ok(PathBuf::from(format!("{}.txt", report.stem)))
    }

    fn write_summary(&self, _config: &BacktestConfig, _stats: &TotalStats) -> Result<(), ScreenerError> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
