//! Warm-up trimming and display windowing over computed indicators.

use crate::error::DashboardError;
use crate::indicators::{self, IndicatorSet, RetracementLevels};
use crate::market::{Bar, BarSeries, LOOKBACK_PADDING};
use serde::Serialize;

/// Half-open `[start, end)` index range into the trimmed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayRange {
    pub start: usize,
    pub end: usize,
}

impl DisplayRange {
    #[cfg(test)]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The whole span, `[0, bars)`.
    pub fn full(bars: usize) -> Self {
        Self { start: 0, end: bars }
    }
}

/// The visible slice: bars, aligned indicators, and retracement levels
/// computed from the visible bars only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub bars: Vec<Bar>,
    pub indicators: IndicatorSet,
    pub retracement: RetracementLevels,
}

/// Drops the warm-up rows from bars and indicators alike.
pub fn trim_warmup(
    bars: &[Bar],
    indicators: &IndicatorSet,
    padding: usize,
) -> Result<(Vec<Bar>, IndicatorSet), DashboardError> {
    if bars.len() <= padding {
        return Err(DashboardError::InsufficientHistory {
            required: padding + 1,
            available: bars.len(),
        });
    }
    Ok((bars[padding..].to_vec(), indicators.slice(padding..bars.len())))
}

/// Selects `range` from the trimmed rows. `end` is clamped to the available
/// length; a window that is empty after clamping is rejected.
pub fn window(
    bars: &[Bar],
    indicators: &IndicatorSet,
    range: DisplayRange,
) -> Result<Analysis, DashboardError> {
    let available = bars.len();
    let end = range.end.min(available);

    if range.start >= end {
        return Err(DashboardError::InvalidRange {
            start: range.start,
            end: range.end,
            available,
        });
    }

    let visible = bars[range.start..end].to_vec();
    let retracement = indicators::fibonacci_levels(&visible).ok_or(DashboardError::InvalidRange {
        start: range.start,
        end: range.end,
        available,
    })?;

    Ok(Analysis {
        bars: visible,
        indicators: indicators.slice(range.start..end),
        retracement,
    })
}

/// Full pipeline for one fetched series: compute over everything, trim the
/// warm-up unconditionally, then window.
pub fn analyze(series: &BarSeries, range: DisplayRange) -> Result<Analysis, DashboardError> {
    let computed = indicators::compute(series);
    let (bars, trimmed) = trim_warmup(&series.bars, &computed, LOOKBACK_PADDING)?;
    window(&bars, &trimmed, range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Pair;
    use crate::market::testing::bars_from_closes;

    fn series(len: usize) -> BarSeries {
        let closes: Vec<f64> = (0..len).map(|i| 100.0 + (i as f64 * 0.9).sin() * 4.0).collect();
        BarSeries {
            pair: Pair::Btcusd,
            bars: bars_from_closes(&closes),
        }
    }

    #[test]
    fn padded_fetch_yields_exactly_the_requested_rows() {
        for n in [20, 30, 50, 70] {
            let analysis = analyze(&series(n + LOOKBACK_PADDING), DisplayRange::full(n)).unwrap();
            assert_eq!(analysis.bars.len(), n);
            assert_eq!(analysis.indicators.len(), n);
            // Warm-up removed: RSI is defined on every visible bar.
            assert!(analysis.indicators.rsi.iter().all(Option::is_some));
        }
    }

    #[test]
    fn narrow_window_drives_fibonacci_levels() {
        let input = series(20 + LOOKBACK_PADDING);
        let analysis = analyze(&input, DisplayRange::new(0, 5)).unwrap();
        assert_eq!(analysis.bars.len(), 5);

        let visible = &input.bars[LOOKBACK_PADDING..LOOKBACK_PADDING + 5];
        assert_eq!(analysis.bars, visible);

        let low = visible.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let high = visible.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let levels = analysis.retracement.levels();
        assert_eq!(levels[2], high - (high - low) * 0.5);
        assert!(levels.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn window_end_is_clamped() {
        let analysis = analyze(&series(20 + LOOKBACK_PADDING), DisplayRange::new(15, 100)).unwrap();
        assert_eq!(analysis.bars.len(), 5);
    }

    #[test]
    fn empty_or_inverted_windows_are_rejected() {
        let input = series(20 + LOOKBACK_PADDING);
        assert!(matches!(
            analyze(&input, DisplayRange::new(8, 3)),
            Err(DashboardError::InvalidRange { start: 8, end: 3, available: 20 })
        ));
        assert!(matches!(
            analyze(&input, DisplayRange::new(20, 25)),
            Err(DashboardError::InvalidRange { .. })
        ));
    }

    #[test]
    fn too_few_bars_for_the_warmup_trim() {
        let result = analyze(&series(LOOKBACK_PADDING), DisplayRange::full(20));
        assert_eq!(
            result,
            Err(DashboardError::InsufficientHistory {
                required: LOOKBACK_PADDING + 1,
                available: LOOKBACK_PADDING,
            })
        );
    }

    #[test]
    fn short_history_keeps_long_lookbacks_undefined() {
        // 10 visible bars after trimming: 24 total, below the MACD signal warm-up.
        let analysis = analyze(&series(10 + LOOKBACK_PADDING), DisplayRange::full(10)).unwrap();
        assert!(analysis.indicators.signal.iter().all(Option::is_none));
        assert!(analysis.indicators.macd.iter().all(Option::is_none));
        assert_eq!(analysis.indicators.ma.iter().filter(|v| v.is_some()).count(), 5);
    }
}
