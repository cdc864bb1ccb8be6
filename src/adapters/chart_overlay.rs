//! Price scale and overlay levels shared by the chart renderers.

use crate::domain::bar::Bar;
use crate::domain::market_metrics::vwap;
use crate::ports::chart_port::ChartRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct Overlays {
    /// Running VWAP after each bar; empty when the overlay is off.
    pub vwaps: Vec<Option<f64>>,
    pub prev_close: Option<f64>,
    pub min_price: f64,
    pub max_price: f64,
    /// Last bar at or before the signal.
    pub entry_index: usize,
}

/// Running VWAP after each bar; `None` until some volume has traded.
fn vwap_series(bars: &[Bar]) -> Vec<Option<f64>> {
    let refs: Vec<&Bar> = bars.iter().collect();
    (1..=refs.len()).map(|n| vwap(&refs[..n])).collect()
}

impl Overlays {
    /// `None` when the request carries no bars.
    pub fn from_request(request: &ChartRequest<'_>) -> Option<Self> {
        let bars = request.bars;
        let first = bars.first()?;

        let vwaps = if request.show_vwap {
            vwap_series(bars)
        } else {
            Vec::new()
        };
        let prev_close = request.previous_close.filter(|_| request.show_prev_close);

        let (mut min_price, mut max_price) = bars
            .iter()
            .fold((first.low, first.high), |(lo, hi), b| (lo.min(b.low), hi.max(b.high)));
        for level in vwaps
            .iter()
            .flatten()
            .copied()
            .chain(prev_close)
            .chain(std::iter::once(request.signal.price))
        {
            min_price = min_price.min(level);
            max_price = max_price.max(level);
        }

        let entry_index = bars
            .iter()
            .rposition(|b| b.timestamp <= request.signal.timestamp)
            .unwrap_or(0);

        Some(Overlays {
            vwaps,
            prev_close,
            min_price,
            max_price,
            entry_index,
        })
    }

    pub fn range(&self) -> f64 {
        (self.max_price - self.min_price).max(0.01)
    }
}
