//! SVG candlestick charts for screened candidates.

use std::fs;
use std::path::PathBuf;

use super::chart_overlay::Overlays;
use crate::domain::error::ScreenerError;
use crate::domain::signal::Direction;
use crate::ports::chart_port::{ChartPort, ChartRequest};

const CHART_WIDTH: f64 = 900.0;
const CHART_HEIGHT: f64 = 420.0;
const MARGIN_TOP: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 30.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;

pub struct SvgChartAdapter;

impl SvgChartAdapter {
    pub fn new() -> Self {
        SvgChartAdapter
    }
}

impl Default for SvgChartAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_text(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// SVG document for `request`; `None` when there are no bars to draw.
pub fn render_svg(request: &ChartRequest<'_>) -> Option<String> {
    let bars = request.bars;
    let overlays = Overlays::from_request(request)?;
    let (min_price, max_price) = (overlays.min_price, overlays.max_price);
    let range = overlays.range();

    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let slot = plot_width / bars.len().max(1) as f64;
    let body_width = (slot * 0.6).max(1.0);

    let x_center = |i: usize| -> f64 { MARGIN_LEFT + (i as f64 + 0.5) * slot };
    let y_scale =
        |v: f64| -> f64 { MARGIN_TOP + plot_height - ((v - min_price) / range) * plot_height };

    let mut svg = String::new();
    svg.push_str(&format!(
        r##"<svg width="{}" height="{}" viewBox="0 0 {} {}" xmlns="http://www.w3.org/2000/svg">"##,
        CHART_WIDTH, CHART_HEIGHT, CHART_WIDTH, CHART_HEIGHT
    ));
    svg.push_str("\n  <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n");
    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"18\" font-size=\"13\" fill=\"#333\">{} {} {}</text>\n",
        MARGIN_LEFT,
        escape_text(request.ticker),
        escape_text(request.pattern),
        request.signal.timestamp.format("%Y-%m-%d %H:%M")
    ));
    for (label, value) in [("max", max_price), ("min", min_price)] {
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{:.1}\" text-anchor=\"end\" font-size=\"10\" fill=\"#666\" class=\"{}\">${:.2}</text>\n",
            MARGIN_LEFT - 5.0,
            y_scale(value) + 4.0,
            label,
            value
        ));
    }

    for (i, bar) in bars.iter().enumerate() {
        let x = x_center(i);
        let colour = if bar.close >= bar.open { "#16a34a" } else { "#dc2626" };
        let top = y_scale(bar.open.max(bar.close));
        let bottom = y_scale(bar.open.min(bar.close));
        svg.push_str(&format!(
            "  <line x1=\"{x:.1}\" y1=\"{:.1}\" x2=\"{x:.1}\" y2=\"{:.1}\" stroke=\"{colour}\" stroke-width=\"1\"/>\n",
            y_scale(bar.high),
            y_scale(bar.low),
        ));
        svg.push_str(&format!(
            "  <rect class=\"candle\" x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"{colour}\"/>\n",
            x - body_width / 2.0,
            top,
            body_width,
            (bottom - top).max(0.5),
        ));
    }

    let mut path_data = String::new();
    for (i, value) in overlays.vwaps.iter().enumerate() {
        let Some(v) = value else { continue };
        let cmd = if path_data.is_empty() { "M" } else { " L" };
        path_data.push_str(&format!("{} {:.1} {:.1}", cmd, x_center(i), y_scale(*v)));
    }
    if !path_data.is_empty() {
        svg.push_str(&format!(
            "  <path class=\"vwap\" d=\"{}\" fill=\"none\" stroke=\"#2563eb\" stroke-width=\"1.5\"/>\n",
            path_data
        ));
    }

    if let Some(level) = overlays.prev_close {
        let y = y_scale(level);
        svg.push_str(&format!(
            "  <line class=\"prev-close\" x1=\"{}\" y1=\"{y:.1}\" x2=\"{}\" y2=\"{y:.1}\" stroke=\"#999\" stroke-dasharray=\"4 3\"/>\n",
            MARGIN_LEFT,
            CHART_WIDTH - MARGIN_RIGHT,
        ));
    }

    let entry_index = overlays.entry_index;
    let marker_y = y_scale(request.signal.price);
    let (points, colour) = match request.signal.direction {
        Some(Direction::Short) => (
            format!(
                "{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}",
                x_center(entry_index),
                marker_y + 2.0,
                x_center(entry_index) - 6.0,
                marker_y - 10.0,
                x_center(entry_index) + 6.0,
                marker_y - 10.0
            ),
            "#dc2626",
        ),
        _ => (
            format!(
                "{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}",
                x_center(entry_index),
                marker_y - 2.0,
                x_center(entry_index) - 6.0,
                marker_y + 10.0,
                x_center(entry_index) + 6.0,
                marker_y + 10.0
            ),
            "#16a34a",
        ),
    };
    svg.push_str(&format!(
        "  <polygon class=\"entry\" points=\"{}\" fill=\"{}\" stroke=\"#111\" stroke-width=\"0.5\"/>\n",
        points, colour
    ));

    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        for (x, label) in [
            (MARGIN_LEFT, first.timestamp.format("%H:%M").to_string()),
            (CHART_WIDTH - MARGIN_RIGHT, last.timestamp.format("%H:%M").to_string()),
        ] {
            svg.push_str(&format!(
                "  <text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-size=\"10\" fill=\"#666\">{}</text>\n",
                x,
                CHART_HEIGHT - 8.0,
                label
            ));
        }
    }

    svg.push_str("</svg>");
    Some(svg)
}

impl ChartPort for SvgChartAdapter {
    fn render(&self, request: &ChartRequest<'_>) -> Result<PathBuf, ScreenerError> {
        let chart_err = |reason: String| ScreenerError::ChartGeneration {
            ticker: request.ticker.to_string(),
            date: request.signal.date(),
            reason,
        };
        let svg = render_svg(request)
            .ok_or_else(|| chart_err("no regular-session bars before entry".to_string()))?;

        let path = request.path.with_extension("svg");
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| chart_err(format!("{}: {e}", dir.display())))?;
        }
        fs::write(&path, svg)
            .map_err(|e| chart_err(format!("{}: {e}", path.display())))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar::Bar;
    use crate::domain::signal::Signal;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

    fn bar(ts: &str, open: f64, close: f64) -> Bar {
        Bar {
            timestamp: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M").unwrap(),
            open,
            high: open.max(close) + 0.2,
            low: open.min(close) - 0.2,
            close,
            volume: Some(500),
        }
    }

    fn bars() -> Vec<Bar> {
        vec![
            bar("2024-03-01 09:30", 100.0, 100.4),
            bar("2024-03-01 09:31", 100.4, 100.1),
            bar("2024-03-01 09:32", 100.1, 100.8),
        ]
    }

    fn signal() -> Signal {
        Signal::entry(
            NaiveDateTime::parse_from_str("2024-03-01 09:32", "%Y-%m-%d %H:%M").unwrap(),
            100.8,
            Some(Direction::Long),
        )
    }

    fn request<'a>(bars: &'a [Bar], signal: &'a Signal, path: PathBuf) -> ChartRequest<'a> {
        ChartRequest {
            ticker: "SPY",
            pattern: "quick_rise",
            bars,
            signal,
            previous_close: Some(99.0),
            show_vwap: true,
            show_prev_close: true,
            path,
        }
    }

    #[test]
    fn svg_has_candles_marker_and_overlays() {
        let bars = bars();
        let signal = signal();
        let svg = render_svg(&request(&bars, &signal, PathBuf::from("x.svg"))).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches("class=\"candle\"").count(), 3);
        assert!(svg.contains("class=\"entry\""));
        assert!(svg.contains("class=\"vwap\""));
        assert!(svg.contains("class=\"prev-close\""));
        assert!(svg.contains("$99.00"));
    }

    #[test]
    fn overlays_can_be_hidden() {
        let bars = bars();
        let signal = signal();
        let mut req = request(&bars, &signal, PathBuf::from("x.svg"));
        req.show_vwap = false;
        req.show_prev_close = false;
        let svg = render_svg(&req).unwrap();
        assert!(!svg.contains("class=\"vwap\""));
        assert!(!svg.contains("class=\"prev-close\""));
    }

    #[test]
    fn render_writes_file() {
        let dir = TempDir::new().unwrap();
        let bars = bars();
        let signal = signal();
        let target = dir.path().join("charts").join("SPY_quick_rise_2024-03-01_0932.png");
        let path = SvgChartAdapter::new()
            .render(&request(&bars, &signal, target))
            .unwrap();
        assert_eq!(path.extension().unwrap(), "svg");
        assert!(fs::read_to_string(path).unwrap().contains("<svg"));
    }

    #[test]
    fn empty_window_is_a_chart_error() {
        let signal = signal();
        let err = SvgChartAdapter::new()
            .render(&request(&[], &signal, PathBuf::from("x.svg")))
            .unwrap_err();
        assert!(matches!(err, ScreenerError::ChartGeneration { .. }));
    }

    #[test]
    fn labels_are_escaped_and_empty_input_renders_nothing() {
        let bars = bars();
        let signal = signal();
        let mut req = request(&bars, &signal, PathBuf::from("x.svg"));
        req.ticker = "AT&T";
        req.pattern = "<fixed_time>";
        let svg = render_svg(&req).unwrap();
        assert!(svg.contains("AT&amp;T &lt;fixed_time&gt;"));
        assert!(!svg.contains("NaN"));

        req.bars = &[];
        assert!(render_svg(&req).is_none());
    }
}
