//! One refresh cycle: fetch the selected pair and the heatmap pairs
//! concurrently, derive analytics, and publish all three charts together.

use crate::analysis::{self, DisplayRange};
use crate::charts::{CandlestickChart, HeatmapChart, IndicatorChart};
use crate::config::{AppConfig, DefaultSelection};
use crate::error::DashboardError;
use crate::heatmap;
use crate::market::{self, BarSource, Interval, Pair, Span};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorKind {
    #[serde(rename = "RSI")]
    Rsi,
    #[serde(rename = "MACD")]
    Macd,
    Bollinger,
    SupportResistance,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 4] = [
        IndicatorKind::Rsi,
        IndicatorKind::Macd,
        IndicatorKind::Bollinger,
        IndicatorKind::SupportResistance,
    ];

    pub fn label(self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "RSI Indicator",
            IndicatorKind::Macd => "MACD Indicator",
            IndicatorKind::Bollinger => "Bollinger Bands",
            IndicatorKind::SupportResistance => "Support and Resistance Levels",
        }
    }
}

/// Everything the user has selected, frozen for the duration of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub pair: Pair,
    pub interval: Interval,
    pub span: Span,
    pub indicator: IndicatorKind,
    pub range: DisplayRange,
}

impl From<DefaultSelection> for Selection {
    fn from(d: DefaultSelection) -> Self {
        Self {
            pair: d.pair,
            interval: d.interval,
            span: d.span,
            indicator: d.indicator,
            range: DisplayRange::full(d.span.bars()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub selection: Selection,
    pub taken_at: DateTime<Utc>,
    pub candles: CandlestickChart,
    pub indicator: IndicatorChart,
    pub heatmap: HeatmapChart,
}

/// Runs one refresh. Heatmap failures are absorbed per pair; a failure of
/// the selected pair fails the whole refresh so the caller keeps showing its
/// previous snapshot.
pub async fn refresh<S: BarSource + Sync>(
    source: &S,
    config: &AppConfig,
    selection: Selection,
) -> Result<Snapshot, DashboardError> {
    let bar_count = selection.span.bars();

    let (primary, rows) = tokio::join!(
        market::fetch(source, selection.pair, selection.interval, bar_count),
        heatmap::aggregate(
            source,
            &config.tracked_pairs,
            selection.interval,
            bar_count,
            config.refresh.heatmap_concurrency,
        ),
    );

    let analysis = analysis::analyze(&primary?, selection.range)?;

    tracing::info!(
        pair = %selection.pair,
        bars = analysis.bars.len(),
        heatmap_rows = rows.len(),
        "refresh complete"
    );

    Ok(Snapshot {
        selection,
        taken_at: Utc::now(),
        candles: CandlestickChart::from_analysis(&analysis),
        indicator: IndicatorChart::build(selection.indicator, &analysis),
        heatmap: HeatmapChart::from_rows(&rows),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::LOOKBACK_PADDING;
    use crate::market::testing::StubSource;

    fn closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 + (i as f64 * 0.4).sin() * 8.0).collect()
    }

    #[tokio::test]
    async fn snapshot_holds_all_three_charts_from_one_pull() {
        let source = StubSource::default()
            .with_closes(Pair::Btcusd, &closes(200))
            .with_closes(Pair::Ethusd, &[10.0, 11.0]);
        let config = AppConfig {
            tracked_pairs: vec![Pair::Ethusd, Pair::Btcusd, Pair::Xrpusd],
            ..AppConfig::default()
        };
        let selection = Selection::from(config.defaults);

        let snapshot = refresh(&source, &config, selection).await.unwrap();

        assert_eq!(snapshot.candles.close.len(), 30);
        assert_eq!(snapshot.indicator.kind, IndicatorKind::Rsi);
        assert_eq!(snapshot.indicator.timestamps, snapshot.candles.timestamps);
        assert_eq!(snapshot.heatmap.labels, ["ETH/USD", "BTC/USD", "XRP/USD"]);
        assert_eq!(snapshot.heatmap.changes[0], Some(0.1));
        assert!(snapshot.heatmap.changes[1].is_some());
        assert_eq!(snapshot.heatmap.changes[2], None);
    }

    #[tokio::test]
    async fn selected_range_narrows_every_chart() {
        let source = StubSource::default().with_closes(Pair::Solusd, &closes(20 + LOOKBACK_PADDING));
        let config = AppConfig::default();
        let selection = Selection {
            pair: Pair::Solusd,
            interval: Interval::OneHour,
            span: Span::Twenty,
            indicator: IndicatorKind::Bollinger,
            range: DisplayRange::new(0, 5),
        };

        let snapshot = refresh(&source, &config, selection).await.unwrap();
        assert_eq!(snapshot.candles.timestamps.len(), 5);
        assert!(snapshot.indicator.traces.iter().all(|t| t.values.len() == 5));
        assert_eq!(snapshot.heatmap.labels.len(), Pair::ALL.len());
    }

    #[tokio::test]
    async fn primary_failure_fails_the_refresh() {
        let source = StubSource::default().with_closes(Pair::Ethusd, &closes(50));
        let config = AppConfig::default();
        let selection = Selection::from(config.defaults);

        let result = refresh(&source, &config, selection).await;
        assert!(matches!(
            result,
            Err(DashboardError::DataUnavailable { pair: Pair::Btcusd, .. })
        ));
    }
}
