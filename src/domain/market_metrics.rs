//! Market-context metrics derived from intraday bars around a signal.
//!
//! All context comes from regular-session bars available at the signal's
//! timestamp. Suppressed metrics are neither computed nor rendered.

use chrono::NaiveDate;
use std::fmt;

use super::bar::{aggregate_daily, regular_session_days, Bar, DailyBar};
use super::signal::Signal;

pub const SMA_PERIOD: usize = 20;
/// Band, in price units, inside which a price counts as "at" a reference level.
pub const AT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Above,
    Below,
    At,
}

impl Position {
    pub fn classify(price: f64, reference: f64) -> Self {
        let diff = price - reference;
        if diff.abs() <= AT_TOLERANCE {
            Position::At
        } else if diff > 0.0 {
            Position::Above
        } else {
            Position::Below
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Position::Above => "above",
            Position::Below => "below",
            Position::At => "at",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapDirection {
    Up,
    Down,
    None,
}

impl fmt::Display for GapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GapDirection::Up => "UP",
            GapDirection::Down => "DOWN",
            GapDirection::None => "NONE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gap {
    pub direction: GapDirection,
    /// today_open - prev_close
    pub amount: f64,
    /// |amount| / prev_close * 100
    pub percent: f64,
}

impl Gap {
    pub fn between(prev_close: f64, today_open: f64) -> Self {
        let amount = today_open - prev_close;
        let direction = if amount > 0.0 {
            GapDirection::Up
        } else if amount < 0.0 {
            GapDirection::Down
        } else {
            GapDirection::None
        };
        let percent = if prev_close != 0.0 {
            amount.abs() / prev_close * 100.0
        } else {
            0.0
        };
        Gap {
            direction,
            amount,
            percent,
        }
    }

    pub fn display(&self) -> String {
        format!("Gap: {} {:+.2} ({:.2}%)", self.direction, self.amount, self.percent)
    }
}

/// A reference level compared with the current price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelComparison {
    pub value: f64,
    pub position: Position,
    /// (price - value) / value * 100
    pub percent_diff: f64,
}

impl LevelComparison {
    fn new(price: f64, value: f64) -> Self {
        LevelComparison {
            value,
            position: Position::classify(price, value),
            percent_diff: if value != 0.0 {
                (price - value) / value * 100.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricsOptions {
    pub suppress_sma: bool,
    pub suppress_vwap: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketMetrics {
    pub date: NaiveDate,
    pub current_price: f64,
    pub previous_close: Option<f64>,
    pub today_open: Option<f64>,
    pub today_high: Option<f64>,
    pub today_low: Option<f64>,
    pub gap: Option<Gap>,
    /// `None` when suppressed or when no volume traded yet.
    pub vwap: Option<LevelComparison>,
    /// `None` when suppressed or fewer than twenty completed days precede
    /// the signal date.
    pub sma: Option<LevelComparison>,
    /// Position of VWAP relative to SMA; present only when both exist.
    pub vwap_vs_sma: Option<Position>,
    pub price_line: String,
    pub indicator_line: String,
    pub prompt_text: String,
    options: MetricsOptions,
}

impl MarketMetrics {
    /// Derive market context for `signal` from `bars`.
    ///
    /// `daily` replaces the intraday-derived daily series for the SMA when
    /// supplied. Either way only days before the signal date count.
    pub fn generate(
        bars: &[Bar],
        signal: &Signal,
        daily: Option<&[DailyBar]>,
        options: MetricsOptions,
    ) -> Self {
        let available: Vec<Bar> = bars
            .iter()
            .filter(|b| b.timestamp <= signal.timestamp)
            .cloned()
            .collect();
        let days = regular_session_days(&available);
        let signal_date = signal.date();
        let price = signal.price;

        let previous_close = days
            .range(..signal_date)
            .next_back()
            .and_then(|(_, day)| day.last())
            .map(|b| b.close);

        let today = days.get(&signal_date);
        let today_open = today.and_then(|d| d.first()).map(|b| b.open);
        let today_high = today.and_then(|d| {
            d.iter()
                .map(|b| b.high)
                .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))))
        });
        let today_low = today.and_then(|d| {
            d.iter()
                .map(|b| b.low)
                .fold(None, |acc: Option<f64>, l| Some(acc.map_or(l, |a| a.min(l))))
        });

        let gap = match (previous_close, today_open) {
            (Some(prev), Some(open)) => Some(Gap::between(prev, open)),
            _ => None,
        };

        let vwap = if options.suppress_vwap {
            None
        } else {
            today
                .and_then(|d| vwap(d))
                .map(|v| LevelComparison::new(price, v))
        };

        let sma = if options.suppress_sma {
            None
        } else {
            let derived;
            let series = match daily {
                Some(series) => series,
                None => {
                    derived = aggregate_daily(&available);
                    derived.as_slice()
                }
            };
            let closes: Vec<f64> = series
                .iter()
                .filter(|d| d.date < signal_date)
                .map(|d| d.close)
                .collect();
            simple_moving_average(&closes, SMA_PERIOD).map(|v| LevelComparison::new(price, v))
        };

        let vwap_vs_sma = match (&vwap, &sma) {
            (Some(v), Some(s)) => Some(Position::classify(v.value, s.value)),
            _ => None,
        };

        let mut metrics = MarketMetrics {
            date: signal_date,
            current_price: price,
            previous_close,
            today_open,
            today_high,
            today_low,
            gap,
            vwap,
            sma,
            vwap_vs_sma,
            price_line: String::new(),
            indicator_line: String::new(),
            prompt_text: String::new(),
            options,
        };
        metrics.price_line = metrics.render_price_line();
        metrics.indicator_line = metrics.render_indicator_line();
        metrics.prompt_text = metrics.render_prompt();
        metrics
    }

    fn render_price_line(&self) -> String {
        let mut line = format!(
            "Prev Close: {} | Open: {} | High: {} | Low: {}",
            money(self.previous_close),
            money(self.today_open),
            money(self.today_high),
            money(self.today_low),
        );
        if let Some(gap) = &self.gap {
            line.push_str(" | ");
            line.push_str(&gap.display());
        }
        line
    }

    fn render_indicator_line(&self) -> String {
        let mut parts = vec![format!("Price: ${:.2}", self.current_price)];
        if !self.options.suppress_vwap {
            parts.push(match &self.vwap {
                Some(v) => format!("VWAP: ${:.2} ({} {:+.2}%)", v.value, v.position, v.percent_diff),
                None => "VWAP: N/A".to_string(),
            });
        }
        if !self.options.suppress_sma {
            parts.push(match &self.sma {
                Some(s) => format!(
                    "SMA{}: ${:.2} ({} {:+.2}%)",
                    SMA_PERIOD, s.value, s.position, s.percent_diff
                ),
                None => format!("SMA{}: N/A", SMA_PERIOD),
            });
        }
        parts.join(" | ")
    }

    fn render_prompt(&self) -> String {
        let mut lines = vec![
            format!("Market context for {}:", self.date),
            format!("- Previous close: {}", money(self.previous_close)),
            format!("- Today's open: {}", money(self.today_open)),
            format!("- Today's high so far: {}", money(self.today_high)),
            format!("- Today's low so far: {}", money(self.today_low)),
        ];
        if let Some(gap) = &self.gap {
            lines.push(format!("- {}", gap.display()));
        }
        lines.push(format!("- Current price: ${:.2}", self.current_price));
        if !self.options.suppress_vwap {
            lines.push(match &self.vwap {
                Some(v) => format!(
                    "- VWAP: ${:.2}; price is {} VWAP ({:+.2}%)",
                    v.value, v.position, v.percent_diff
                ),
                None => "- VWAP: N/A".to_string(),
            });
        }
        if !self.options.suppress_sma {
            lines.push(match &self.sma {
                Some(s) => format!(
                    "- SMA({}) of daily closes: ${:.2}; price is {} SMA ({:+.2}%)",
                    SMA_PERIOD, s.value, s.position, s.percent_diff
                ),
                None => format!("- SMA({}): N/A (fewer than {} days)", SMA_PERIOD, SMA_PERIOD),
            });
        }
        if let Some(rel) = self.vwap_vs_sma {
            lines.push(format!("- VWAP is {} SMA({})", rel, SMA_PERIOD));
        }
        lines.join("\n")
    }
}

fn money(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("${:.2}", v),
        None => "N/A".to_string(),
    }
}

/// Σ(typical × volume) / Σ(volume); bars without volume are skipped.
pub fn vwap(bars: &[&Bar]) -> Option<f64> {
    let (pv, volume) = bars
        .iter()
        .filter_map(|b| match b.volume {
            Some(v) if v > 0 => Some((b.typical_price() * v as f64, v as f64)),
            _ => None,
        })
        .fold((0.0, 0.0), |(pv, vol), (p, v)| (pv + p, vol + v));
    (volume > 0.0).then(|| pv / volume)
}

/// Mean of the last `period` values, or `None` when fewer exist.
pub fn simple_moving_average(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Direction;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDateTime};

    fn bar(ts: &str, open: f64, high: f64, low: f64, close: f64, volume: Option<i64>) -> Bar {
        Bar {
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn signal(ts: &str, price: f64) -> Signal {
        Signal::entry(
            NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            price,
            Some(Direction::Long),
        )
    }

    fn two_day_bars() -> Vec<Bar> {
        vec![
            bar("2024-03-01 09:30", 100.0, 101.0, 99.5, 100.5, Some(1000)),
            bar("2024-03-01 15:59", 101.0, 101.8, 101.0, 101.5, Some(1000)),
            bar("2024-03-01 17:30", 101.5, 102.0, 101.4, 101.9, Some(50)),
            bar("2024-03-04 08:00", 102.5, 102.6, 102.4, 102.5, Some(30)),
            bar("2024-03-04 09:30", 103.0, 103.5, 102.8, 103.2, Some(2000)),
            bar("2024-03-04 09:31", 103.2, 104.0, 103.1, 103.9, Some(1000)),
        ]
    }

    #[test]
    fn gap_up_from_previous_close() {
        let m = MarketMetrics::generate(
            &two_day_bars(),
            &signal("2024-03-04 09:31", 103.9),
            None,
            MetricsOptions::default(),
        );
        assert_eq!(m.previous_close, Some(101.5));
        assert_eq!(m.today_open, Some(103.0));
        let gap = m.gap.unwrap();
        assert_eq!(gap.direction, GapDirection::Up);
        assert_relative_eq!(gap.amount, 1.5, epsilon = 1e-9);
        assert_relative_eq!(gap.percent, 1.477_832_5, epsilon = 1e-6);
        assert!(m.prompt_text.contains("Gap: UP +1.50 (1.48%)"));
    }

    #[test]
    fn extended_hours_excluded_from_context() {
        let m = MarketMetrics::generate(
            &two_day_bars(),
            &signal("2024-03-04 09:31", 103.9),
            None,
            MetricsOptions::default(),
        );
        // after-hours 101.9 and pre-market 102.5 must not leak in
        assert_eq!(m.previous_close, Some(101.5));
        assert_eq!(m.today_high, Some(104.0));
        assert_eq!(m.today_low, Some(102.8));
    }

    #[test]
    fn missing_previous_day_omits_gap() {
        let bars: Vec<Bar> = two_day_bars().into_iter().skip(3).collect();
        let m = MarketMetrics::generate(
            &bars,
            &signal("2024-03-04 09:31", 103.9),
            None,
            MetricsOptions::default(),
        );
        assert_eq!(m.previous_close, None);
        assert!(m.gap.is_none());
        assert!(m.prompt_text.contains("- Previous close: N/A"));
        assert!(!m.prompt_text.contains("Gap"));
        assert!(!m.price_line.contains("Gap"));
        assert!(m.price_line.starts_with("Prev Close: N/A"));
    }

    #[test]
    fn missing_today_session_is_na() {
        let bars: Vec<Bar> = two_day_bars().into_iter().take(4).collect();
        let m = MarketMetrics::generate(
            &bars,
            &signal("2024-03-04 09:31", 103.9),
            None,
            MetricsOptions::default(),
        );
        assert_eq!(m.previous_close, Some(101.5));
        assert_eq!(m.today_open, None);
        assert!(m.gap.is_none());
        assert!(m.prompt_text.contains("- Today's open: N/A"));
        assert!(m.prompt_text.contains("- VWAP: N/A"));
    }

    #[test]
    fn vwap_weights_typical_price_and_skips_zero_volume() {
        let bars = vec![
            bar("2024-03-04 09:30", 10.0, 12.0, 9.0, 11.0, Some(100)),
            bar("2024-03-04 09:31", 11.0, 13.0, 10.0, 12.0, Some(300)),
            bar("2024-03-04 09:32", 50.0, 60.0, 40.0, 55.0, Some(0)),
            bar("2024-03-04 09:33", 50.0, 60.0, 40.0, 55.0, None),
        ];
        let refs: Vec<&Bar> = bars.iter().collect();
        let expected = (100.0 * (32.0 / 3.0) + 300.0 * (35.0 / 3.0)) / 400.0;
        assert_relative_eq!(vwap(&refs).unwrap(), expected, epsilon = 1e-9);
        assert_eq!(vwap(&refs[2..]), None);
    }

    #[test]
    fn bars_after_signal_are_not_available() {
        let mut bars = two_day_bars();
        bars.push(bar("2024-03-04 10:00", 104.0, 110.0, 90.0, 105.0, Some(5000)));
        let m = MarketMetrics::generate(
            &bars,
            &signal("2024-03-04 09:31", 103.9),
            None,
            MetricsOptions::default(),
        );
        assert_eq!(m.today_high, Some(104.0));
        assert_eq!(m.today_low, Some(102.8));
    }

    #[test]
    fn position_tolerance_band() {
        assert_eq!(Position::classify(100.005, 100.0), Position::At);
        assert_eq!(Position::classify(99.995, 100.0), Position::At);
        assert_eq!(Position::classify(100.02, 100.0), Position::Above);
        assert_eq!(Position::classify(99.98, 100.0), Position::Below);
    }

    fn daily_series(days: usize) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..days)
            .map(|i| DailyBar {
                date: start + Duration::days(i as i64),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1000,
            })
            .collect()
    }

    #[test]
    fn sma_uses_external_daily_series() {
        let series = daily_series(25);
        let m = MarketMetrics::generate(
            &two_day_bars(),
            &signal("2024-03-04 09:31", 103.9),
            Some(&series),
            MetricsOptions::default(),
        );
        // closes 105..=124 → mean 114.5
        let sma = m.sma.unwrap();
        assert_relative_eq!(sma.value, 114.5, epsilon = 1e-9);
        assert_eq!(sma.position, Position::Below);
        assert!(m.prompt_text.contains("SMA(20) of daily closes: $114.50"));
    }

    #[test]
    fn sma_undefined_with_fewer_than_twenty_days() {
        let series = daily_series(19);
        let m = MarketMetrics::generate(
            &two_day_bars(),
            &signal("2024-03-04 09:31", 103.9),
            Some(&series),
            MetricsOptions::default(),
        );
        assert!(m.sma.is_none());
        assert!(m.vwap_vs_sma.is_none());
        assert!(m.prompt_text.contains("SMA(20): N/A"));
    }

    #[test]
    fn sma_derived_from_intraday_bars() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut bars = Vec::new();
        for i in 0..21 {
            let day = start + Duration::days(i);
            let close = 50.0 + i as f64;
            bars.push(Bar {
                timestamp: day.and_hms_opt(9, 30, 0).unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: Some(100),
            });
        }
        let sig = Signal::entry(
            (start + Duration::days(20)).and_hms_opt(9, 30, 0).unwrap(),
            70.0,
            None,
        );
        let m = MarketMetrics::generate(&bars, &sig, None, MetricsOptions::default());
        // completed days only: 50..=69 → 59.5
        assert_relative_eq!(m.sma.unwrap().value, 59.5, epsilon = 1e-9);
        assert_eq!(m.vwap_vs_sma, Some(Position::Above));
    }

    #[test]
    fn sma_agrees_across_daily_sources() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let signal_day = start + Duration::days(20);
        let flat = |date: NaiveDate, close: f64| DailyBar {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
        };
        let mut series: Vec<DailyBar> = (0..20)
            .map(|i| flat(start + Duration::days(i), 100.0))
            .collect();
        series.push(flat(signal_day, 200.0));

        let bars: Vec<Bar> = series
            .iter()
            .map(|d| Bar {
                timestamp: d.date.and_hms_opt(9, 30, 0).unwrap(),
                open: d.open,
                high: d.high,
                low: d.low,
                close: d.close,
                volume: Some(d.volume),
            })
            .collect();
        let sig = Signal::entry(signal_day.and_hms_opt(9, 30, 0).unwrap(), 200.0, None);

        let derived = MarketMetrics::generate(&bars, &sig, None, MetricsOptions::default());
        let external = MarketMetrics::generate(&bars, &sig, Some(&series), MetricsOptions::default());
        assert_eq!(derived.sma, external.sma);
        assert_relative_eq!(derived.sma.unwrap().value, 100.0, epsilon = 1e-9);
        assert_eq!(derived.prompt_text, external.prompt_text);
    }

    #[test]
    fn suppressed_sma_never_appears_in_prompt() {
        let series = daily_series(25);
        let m = MarketMetrics::generate(
            &two_day_bars(),
            &signal("2024-03-04 09:31", 103.9),
            Some(&series),
            MetricsOptions {
                suppress_sma: true,
                suppress_vwap: false,
            },
        );
        assert!(m.sma.is_none());
        assert!(m.vwap_vs_sma.is_none());
        assert!(!m.prompt_text.contains("SMA"));
        assert!(!m.indicator_line.contains("SMA"));
        assert!(m.prompt_text.contains("VWAP"));
    }

    #[test]
    fn suppressed_vwap_never_appears_in_prompt() {
        let m = MarketMetrics::generate(
            &two_day_bars(),
            &signal("2024-03-04 09:31", 103.9),
            None,
            MetricsOptions {
                suppress_sma: false,
                suppress_vwap: true,
            },
        );
        assert!(m.vwap.is_none());
        assert!(!m.prompt_text.contains("VWAP"));
        assert!(!m.indicator_line.contains("VWAP"));
    }

    #[test]
    fn sma_helper() {
        assert_eq!(simple_moving_average(&[1.0, 2.0], 3), None);
        assert_eq!(simple_moving_average(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(simple_moving_average(&[], 0), None);
    }
}
