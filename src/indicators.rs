use crate::market::{Bar, BarSeries};
use serde::Serialize;
use std::ops::Range;
use ta::Next;
use ta::indicators::{BollingerBands, BollingerBandsOutput, Maximum, Minimum, SimpleMovingAverage};

pub const MA_PERIOD: usize = 20;
pub const BB_PERIOD: usize = 20;
pub const BB_STD_MULTIPLIER: f64 = 2.0;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const RSI_PERIOD: usize = 14;
pub const LEVELS_PERIOD: usize = 20;
pub const FIB_RATIOS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];

/// Indicator values aligned with bars; `None` marks warm-up entries.
pub type Series = Vec<Option<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorName {
    Ma,
    Ema,
    BbLower,
    BbMiddle,
    BbUpper,
    Macd,
    Signal,
    Support,
    Resistance,
    Rsi,
}

#[cfg(test)]
impl IndicatorName {
    pub const ALL: [IndicatorName; 10] = [
        IndicatorName::Ma,
        IndicatorName::Ema,
        IndicatorName::BbLower,
        IndicatorName::BbMiddle,
        IndicatorName::BbUpper,
        IndicatorName::Macd,
        IndicatorName::Signal,
        IndicatorName::Support,
        IndicatorName::Resistance,
        IndicatorName::Rsi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorName::Ma => "MA",
            IndicatorName::Ema => "EMA",
            IndicatorName::BbLower => "BB_lower",
            IndicatorName::BbMiddle => "BB_middle",
            IndicatorName::BbUpper => "BB_upper",
            IndicatorName::Macd => "MACD",
            IndicatorName::Signal => "Signal",
            IndicatorName::Support => "Support",
            IndicatorName::Resistance => "Resistance",
            IndicatorName::Rsi => "RSI",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSet {
    pub ma: Series,
    pub ema: Series,
    pub bb_lower: Series,
    pub bb_middle: Series,
    pub bb_upper: Series,
    pub macd: Series,
    pub signal: Series,
    pub support: Series,
    pub resistance: Series,
    pub rsi: Series,
}

impl IndicatorSet {
    pub fn get(&self, name: IndicatorName) -> &[Option<f64>] {
        match name {
            IndicatorName::Ma => &self.ma,
            IndicatorName::Ema => &self.ema,
            IndicatorName::BbLower => &self.bb_lower,
            IndicatorName::BbMiddle => &self.bb_middle,
            IndicatorName::BbUpper => &self.bb_upper,
            IndicatorName::Macd => &self.macd,
            IndicatorName::Signal => &self.signal,
            IndicatorName::Support => &self.support,
            IndicatorName::Resistance => &self.resistance,
            IndicatorName::Rsi => &self.rsi,
        }
    }

    /// Length shared by every series.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ma.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ma.is_empty()
    }

    /// Copies the rows in `range` out of every series.
    pub fn slice(&self, range: Range<usize>) -> IndicatorSet {
        let cut = |s: &Series| s[range.clone()].to_vec();
        IndicatorSet {
            ma: cut(&self.ma),
            ema: cut(&self.ema),
            bb_lower: cut(&self.bb_lower),
            bb_middle: cut(&self.bb_middle),
            bb_upper: cut(&self.bb_upper),
            macd: cut(&self.macd),
            signal: cut(&self.signal),
            support: cut(&self.support),
            resistance: cut(&self.resistance),
            rsi: cut(&self.rsi),
        }
    }
}

/// Feeds `input` through a `ta` indicator, masking the first `warmup`
/// outputs (and everything, if construction failed) as undefined.
fn rolling<I, O>(
    indicator: Option<I>,
    input: &[f64],
    warmup: usize,
    pick: impl Fn(O) -> f64,
) -> Series
where
    I: Next<f64, Output = O>,
{
    let Some(mut indicator) = indicator else {
        return vec![None; input.len()];
    };

    input
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let value = pick(indicator.next(x));
            (i >= warmup && value.is_finite()).then_some(value)
        })
        .collect()
}

/// Exponential moving average with `k = 2 / (period + 1)`, seeded with the
/// simple mean of the first `period` defined values. Leading `None`s in
/// `input` are skipped; the seed lands on the `period`-th defined value.
fn ema(input: &[Option<f64>], period: usize) -> Series {
    let mut out = vec![None; input.len()];
    let Some(first) = input.iter().position(Option::is_some) else {
        return out;
    };
    if period == 0 || input.len() < first + period {
        return out;
    }

    let window: Option<Vec<f64>> = input[first..first + period].iter().copied().collect();
    let Some(window) = window else {
        return out;
    };

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = window.iter().sum::<f64>() / period as f64;
    out[first + period - 1] = Some(prev);

    for (slot, value) in out.iter_mut().zip(input).skip(first + period) {
        let Some(x) = *value else {
            break;
        };
        prev = x * k + prev * (1.0 - k);
        *slot = Some(prev);
    }
    out
}

/// Relative strength index with Wilder smoothing (`alpha = 1 / period`).
/// The first value, at index `period`, averages the first `period` changes.
fn wilder_rsi(closes: &[f64], period: usize) -> Series {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let n = period as f64;

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / n;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for (i, &c) in changes.iter().enumerate().skip(period) {
        avg_gain = (avg_gain * (n - 1.0) + c.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-c).max(0.0)) / n;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    match (avg_gain == 0.0, avg_loss == 0.0) {
        // Flat window: no movement either way.
        (true, true) => 50.0,
        (_, true) => 100.0,
        _ => 100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
    }
}

/// Computes every rolling indicator over the full series.
pub fn compute(series: &BarSeries) -> IndicatorSet {
    let closes = series.closes();
    let highs = series.highs();
    let lows = series.lows();
    let defined: Series = closes.iter().copied().map(Some).collect();

    let ma = rolling(SimpleMovingAverage::new(MA_PERIOD).ok(), &closes, MA_PERIOD - 1, |v| v);
    let ema_line = ema(&defined, MA_PERIOD);

    type Bands = BollingerBandsOutput;
    let bands = BollingerBands::new(BB_PERIOD, BB_STD_MULTIPLIER).ok();
    let bb_lower = rolling(bands.clone(), &closes, BB_PERIOD - 1, |o: Bands| o.lower);
    let bb_middle = rolling(bands.clone(), &closes, BB_PERIOD - 1, |o: Bands| o.average);
    let bb_upper = rolling(bands, &closes, BB_PERIOD - 1, |o: Bands| o.upper);

    // MACD is defined once the slow EMA is; the signal EMA starts there.
    let fast = ema(&defined, MACD_FAST);
    let slow = ema(&defined, MACD_SLOW);
    let macd: Series = fast
        .iter()
        .zip(&slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = ema(&macd, MACD_SIGNAL);

    let rsi = wilder_rsi(&closes, RSI_PERIOD);

    let support = rolling(Minimum::new(LEVELS_PERIOD).ok(), &lows, LEVELS_PERIOD - 1, |v| v);
    let resistance = rolling(Maximum::new(LEVELS_PERIOD).ok(), &highs, LEVELS_PERIOD - 1, |v| v);

    IndicatorSet {
        ma,
        ema: ema_line,
        bb_lower,
        bb_middle,
        bb_upper,
        macd,
        signal,
        support,
        resistance,
        rsi,
    }
}

/// Fibonacci retracement prices, from the top of the range downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetracementLevels(pub [f64; 5]);

impl RetracementLevels {
    pub fn levels(&self) -> &[f64; 5] {
        &self.0
    }
}

/// Retracement levels over the lowest low and highest high of `bars`.
/// Returns `None` for an empty slice.
pub fn fibonacci_levels(bars: &[Bar]) -> Option<RetracementLevels> {
    if bars.is_empty() {
        return None;
    }
    let min = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
    let max = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);

    Some(RetracementLevels(FIB_RATIOS.map(|r| max - (max - min) * r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Pair;
    use crate::market::testing::bars_from_closes;

    fn series(closes: &[f64]) -> BarSeries {
        BarSeries {
            pair: Pair::Btcusd,
            bars: bars_from_closes(closes),
        }
    }

    fn close_to(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn moving_average_and_bands_match_reference_example() {
        let closes: Vec<f64> = (10..30).map(f64::from).collect();
        let set = compute(&series(&closes));

        let ma = set.ma[19].unwrap();
        assert!(close_to(ma, 19.5));

        // Population standard deviation of 20 consecutive integers.
        let std = 33.25_f64.sqrt();
        assert!(close_to(set.bb_middle[19].unwrap(), 19.5));
        assert!(close_to(set.bb_upper[19].unwrap(), 19.5 + 2.0 * std));
        assert!(close_to(set.bb_lower[19].unwrap(), 19.5 - 2.0 * std));
    }

    #[test]
    fn warmup_entries_are_undefined_not_zero() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + f64::from(i % 7)).collect();
        let set = compute(&series(&closes));

        for name in IndicatorName::ALL {
            assert_eq!(set.get(name).len(), 40, "{}", name.as_str());
        }
        assert!(set.ma[..19].iter().all(Option::is_none));
        assert!(set.ma[19].is_some());
        assert!(set.ema[..19].iter().all(Option::is_none));
        assert!(set.rsi[..14].iter().all(Option::is_none));
        assert!(set.rsi[14].is_some());
        assert!(set.macd[..25].iter().all(Option::is_none));
        assert!(set.macd[25].is_some());
        assert!(set.signal[..33].iter().all(Option::is_none));
        assert!(set.signal[33].is_some());
        assert!(set.support[..19].iter().all(Option::is_none));
    }

    #[test]
    fn short_series_leaves_indicators_undefined() {
        let closes: Vec<f64> = (0..12).map(f64::from).collect();
        let set = compute(&series(&closes));

        assert_eq!(set.len(), 12);
        for name in IndicatorName::ALL {
            assert!(set.get(name).iter().all(Option::is_none), "{}", name.as_str());
        }
    }

    #[test]
    fn compute_is_deterministic() {
        let closes: Vec<f64> = (0..60).map(|i| (f64::from(i) * 0.7).sin() * 10.0 + 50.0).collect();
        let input = series(&closes);
        assert_eq!(compute(&input), compute(&input));
    }

    #[test]
    fn rsi_saturates_on_monotonic_moves() {
        let rising: Vec<f64> = (0..30).map(f64::from).collect();
        let set = compute(&series(&rising));
        assert!(set.rsi[14..].iter().all(|v| *v == Some(100.0)));

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - f64::from(i)).collect();
        let set = compute(&series(&falling));
        assert!(set.rsi[14..].iter().all(|v| *v == Some(0.0)));

        let mixed: Vec<f64> = (0..50).map(|i| 100.0 + (f64::from(i) * 1.3).cos() * 5.0).collect();
        let set = compute(&series(&mixed));
        assert!(set.rsi.iter().flatten().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn rsi_uses_wilder_smoothing() {
        // Fourteen changes alternating +2 / -1, then +1 and -3.
        let mut closes = vec![100.0];
        for i in 0..14 {
            let step = if i % 2 == 0 { 2.0 } else { -1.0 };
            closes.push(closes[i] + step);
        }
        closes.push(closes[14] + 1.0);
        closes.push(closes[15] - 3.0);

        let rsi = wilder_rsi(&closes, RSI_PERIOD);
        assert!(rsi[..14].iter().all(Option::is_none));
        // avg gain 1, avg loss 0.5
        assert!(close_to(rsi[14].unwrap(), 200.0 / 3.0));
        // gain (13 + 1) / 14, loss 6.5 / 14
        assert!(close_to(rsi[15].unwrap(), 2800.0 / 41.0));
        // gain 13 / 14, loss (6.5 * 13 / 14 + 3) / 14
        assert!(close_to(rsi[16].unwrap(), 36400.0 / 617.0));
    }

    #[test]
    fn ema_is_seeded_with_the_simple_mean() {
        let closes: Vec<f64> = (0..40).map(f64::from).collect();
        let set = compute(&series(&closes));

        assert_eq!(set.ema[19], Some(9.5));
        let k = 2.0 / 21.0;
        assert!(close_to(set.ema[20].unwrap(), 20.0 * k + 9.5 * (1.0 - k)));
        // On a linear ramp the seeded EMA lags by exactly (period - 1) / 2.
        assert!(close_to(set.ema[39].unwrap(), 39.0 - 9.5));
    }

    #[test]
    fn macd_and_signal_follow_seeded_emas() {
        // Linear ramp: EMA12 lags 5.5, EMA26 lags 12.5, so MACD is a constant 7.
        let ramp: Vec<f64> = (0..50).map(f64::from).collect();
        let set = compute(&series(&ramp));
        assert!(close_to(set.macd[25].unwrap(), 7.0));
        assert!(close_to(set.signal[33].unwrap(), 7.0));

        let wave: Vec<f64> = (0..60).map(|i| 50.0 + (f64::from(i) * 0.45).sin() * 6.0).collect();
        let set = compute(&series(&wave));
        let seed = set.macd[25..=33].iter().flatten().sum::<f64>() / 9.0;
        assert!(set.signal[32].is_none());
        assert!(close_to(set.signal[33].unwrap(), seed));
    }

    #[test]
    fn support_and_resistance_track_rolling_extremes() {
        let closes: Vec<f64> = (0..25).map(f64::from).collect();
        let set = compute(&series(&closes));

        // Window for index 24 covers closes 5..=24, lows/highs offset by one.
        assert_eq!(set.support[24], Some(4.0));
        assert_eq!(set.resistance[24], Some(25.0));
    }

    #[test]
    fn fibonacci_levels_descend_from_the_high() {
        let bars = bars_from_closes(&[10.0, 14.0, 12.0]);
        let levels = fibonacci_levels(&bars).unwrap();

        // low = 9, high = 15
        assert!(close_to(levels.0[2], 12.0));
        assert!(close_to(levels.0[0], 15.0 - 6.0 * 0.236));
        assert!(levels.0.windows(2).all(|w| w[0] >= w[1]));
        assert!(fibonacci_levels(&[]).is_none());
    }

    #[test]
    fn slice_keeps_series_aligned() {
        let closes: Vec<f64> = (0..30).map(f64::from).collect();
        let set = compute(&series(&closes));
        let cut = set.slice(20..25);

        assert_eq!(cut.len(), 5);
        assert_eq!(cut.ma[0], set.ma[20]);
        assert_eq!(cut.rsi[4], set.rsi[24]);
    }
}
