use crate::market::{self, BarSource, Interval, Pair};
use futures::StreamExt;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HeatmapRow {
    pub pair: Pair,
    pub label: &'static str,
    /// Fractional change of the last close over the one before it;
    /// `None` renders as a neutral cell.
    pub change: Option<f64>,
}

/// `(close[-1] - close[-2]) / close[-2]`, undefined with fewer than two
/// closes or a zero base.
pub fn latest_change(closes: &[f64]) -> Option<f64> {
    let [.., prev, last] = closes else {
        return None;
    };
    if *prev == 0.0 {
        return None;
    }
    Some((last - prev) / prev)
}

/// Fetches every tracked pair (at most `concurrency` in flight) and returns
/// one row per pair in configuration order. A failed fetch only blanks its
/// own row.
pub async fn aggregate<S: BarSource + Sync>(
    source: &S,
    pairs: &[Pair],
    interval: Interval,
    bar_count: usize,
    concurrency: usize,
) -> Vec<HeatmapRow> {
    futures::stream::iter(pairs.iter().copied())
        .map(|pair| async move {
            let change = match market::fetch(source, pair, interval, bar_count).await {
                Ok(series) => latest_change(&series.closes()),
                Err(e) => {
                    tracing::warn!(%pair, error = %e, "heatmap fetch failed");
                    None
                }
            };
            HeatmapRow {
                pair,
                label: pair.label(),
                change,
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
