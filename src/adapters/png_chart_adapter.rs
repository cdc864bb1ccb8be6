//! PNG candlestick charts rendered with plotters.
//!
//! Raster output is what the LLM screen can attach to a call. The chart
//! carries no text, so no font backend is needed.

use std::fs;
use std::path::PathBuf;

use plotters::coord::Shift;
use plotters::prelude::*;

use super::chart_overlay::Overlays;
use crate::domain::error::ScreenerError;
use crate::domain::signal::Direction;
use crate::ports::chart_port::{ChartPort, ChartRequest};

const CHART_SIZE: (u32, u32) = (900, 420);
const CANDLE_UP: RGBColor = RGBColor(22, 163, 74);
const CANDLE_DOWN: RGBColor = RGBColor(220, 38, 38);
const VWAP_COLOR: RGBColor = RGBColor(37, 99, 235);
const PREV_CLOSE_COLOR: RGBColor = RGBColor(153, 153, 153);
const ENTRY_COLOR: RGBColor = RGBColor(245, 158, 11);

pub struct PngChartAdapter;

impl PngChartAdapter {
    pub fn new() -> Self {
        PngChartAdapter
    }
}

impl Default for PngChartAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn draw_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    request: &ChartRequest<'_>,
    overlays: &Overlays,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let bars = request.bars;
    let pad = overlays.range() * 0.05;
    let x_range = -0.5..(bars.len() as f64 - 0.5);
    let mut chart = ChartBuilder::on(root)
        .margin(20)
        .build_cartesian_2d(
            x_range.clone(),
            (overlays.min_price - pad)..(overlays.max_price + pad),
        )?;

    for (i, bar) in bars.iter().enumerate() {
        let x = i as f64;
        let color = if bar.close >= bar.open {
            CANDLE_UP
        } else {
            CANDLE_DOWN
        };
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(x, bar.low), (x, bar.high)],
            &color,
        )))?;
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (x - 0.3, bar.open.min(bar.close)),
                (x + 0.3, bar.open.max(bar.close)),
            ],
            color.filled(),
        )))?;
    }

    let vwap_points: Vec<(f64, f64)> = overlays
        .vwaps
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
        .collect();
    if !vwap_points.is_empty() {
        chart.draw_series(std::iter::once(PathElement::new(
            vwap_points,
            VWAP_COLOR.stroke_width(2),
        )))?;
    }

    if let Some(level) = overlays.prev_close {
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(x_range.start, level), (x_range.end, level)],
            &PREV_CLOSE_COLOR,
        )))?;
    }

    // Long entries point up from below the price, shorts down from above.
    let x = overlays.entry_index as f64;
    let price = request.signal.price;
    let height = overlays.range() * 0.04;
    let base = match request.signal.direction {
        Some(Direction::Short) => price + height,
        _ => price - height,
    };
    chart.draw_series(std::iter::once(Polygon::new(
        vec![(x, price), (x - 0.5, base), (x + 0.5, base)],
        ENTRY_COLOR.filled(),
    )))?;

    Ok(())
}

impl ChartPort for PngChartAdapter {
    fn render(&self, request: &ChartRequest<'_>) -> Result<PathBuf, ScreenerError> {
        let chart_err = |reason: String| ScreenerError::ChartGeneration {
            ticker: request.ticker.to_string(),
            date: request.signal.date(),
            reason,
        };
        let overlays = Overlays::from_request(request)
            .ok_or_else(|| chart_err("no regular-session bars before entry".to_string()))?;

        let path = request.path.with_extension("png");
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| chart_err(format!("{}: {e}", dir.display())))?;
        }

        let root = BitMapBackend::new(&path, CHART_SIZE).into_drawing_area();
        draw_chart(&root, request, &overlays)
            .map_err(|e| chart_err(format!("{}: {e}", path.display())))?;
        root.present()
            .map_err(|e| chart_err(format!("{}: {e}", path.display())))?;
        drop(root);
        Ok(path)
    }
}
