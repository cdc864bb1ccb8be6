//! Resolved run configuration.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::market_metrics::MetricsOptions;
use super::pattern::{EntryPattern, ExitPattern, PatternSpec, RiskLevels};
use super::screen::ScreenConfig;
use super::signal::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::OneMinute,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::ThirtyMinutes,
        Timeframe::OneHour,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Timeframe::ALL.iter().map(|tf| tf.as_str()).collect();
                format!("unknown timeframe '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Chart file format. Only raster charts can be shown to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartFormat {
    #[default]
    Png,
    Svg,
}

impl ChartFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ChartFormat::Png => "png",
            ChartFormat::Svg => "svg",
        }
    }
}

impl FromStr for ChartFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ChartFormat::Png),
            "svg" => Ok(ChartFormat::Svg),
            other => Err(format!("unknown chart format '{other}' (expected png or svg)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartOptions {
    /// Render a chart for every candidate even when the screen is off.
    pub generate: bool,
    pub format: ChartFormat,
    pub output_dir: PathBuf,
    pub show_vwap: bool,
    pub show_prev_close: bool,
}

impl Default for ChartOptions {
    fn default() -> Self {
        ChartOptions {
            generate: false,
            format: ChartFormat::default(),
            output_dir: PathBuf::from("charts"),
            show_vwap: true,
            show_prev_close: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputOptions {
    pub dir: PathBuf,
    /// Write a per-candidate text artifact next to the chart.
    pub write_candidates: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        OutputOptions {
            dir: PathBuf::from("output"),
            write_candidates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestConfig {
    pub ticker: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: Timeframe,
    /// Nominal direction assigned to every candidate of the run.
    pub direction: Direction,
    pub entry: EntryPattern,
    pub exit: ExitPattern,
    pub risk: RiskLevels,
    pub screen: ScreenConfig,
    pub charts: ChartOptions,
    #[serde(skip)]
    pub metrics: MetricsOptions,
    pub output: OutputOptions,
    pub debug: bool,
}

impl BacktestConfig {
    /// `entry+exit`, used in artifact names and logs.
    pub fn pattern_label(&self) -> String {
        format!("{}+{}", self.entry.name(), self.exit.name())
    }

    /// JSON copy of the whole configuration, handed verbatim to the LLM client.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Whether candidates need a chart rendered.
    pub fn wants_chart(&self) -> bool {
        self.screen.enabled || self.charts.generate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_round_trips_names() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!(" 5M ".parse::<Timeframe>().unwrap(), Timeframe::FiveMinutes);
        assert!("2m".parse::<Timeframe>().unwrap_err().contains("1m, 5m"));
    }

    #[test]
    fn chart_format_defaults_to_png() {
        assert_eq!(ChartOptions::default().format, ChartFormat::Png);
        assert_eq!("SVG".parse::<ChartFormat>().unwrap().extension(), "svg");
        assert!("gif".parse::<ChartFormat>().is_err());
    }
}
