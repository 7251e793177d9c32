//! Chart payloads handed to the UI. Undefined points serialize as `null`.

use crate::analysis::Analysis;
use crate::heatmap::HeatmapRow;
use crate::indicators::{IndicatorName, Series};
use crate::refresh::IndicatorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Trace {
    pub name: String,
    pub values: Series,
}

impl Trace {
    fn new(name: &str, values: &[Option<f64>]) -> Self {
        Self {
            name: name.to_string(),
            values: values.to_vec(),
        }
    }
}

/// Horizontal retracement line across the visible time range.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FibLine {
    pub name: String,
    pub price: f64,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CandlestickChart {
    pub timestamps: Vec<DateTime<Utc>>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    /// MA and EMA overlays, hidden until toggled on.
    pub overlays: Vec<Trace>,
    pub fibonacci: Vec<FibLine>,
}

impl CandlestickChart {
    pub fn from_analysis(analysis: &Analysis) -> Self {
        let bars = &analysis.bars;
        let timestamps: Vec<DateTime<Utc>> = bars.iter().map(|b| b.timestamp).collect();

        let fibonacci = match (timestamps.first(), timestamps.last()) {
            (Some(&from), Some(&to)) => analysis
                .retracement
                .levels()
                .iter()
                .enumerate()
                .map(|(i, &price)| FibLine {
                    name: format!("Fib Level {}", i + 1),
                    price,
                    from,
                    to,
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            open: bars.iter().map(|b| b.open).collect(),
            high: bars.iter().map(|b| b.high).collect(),
            low: bars.iter().map(|b| b.low).collect(),
            close: bars.iter().map(|b| b.close).collect(),
            overlays: vec![
                Trace::new("MA", analysis.indicators.get(IndicatorName::Ma)),
                Trace::new("EMA", analysis.indicators.get(IndicatorName::Ema)),
            ],
            fibonacci,
            timestamps,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IndicatorChart {
    pub kind: IndicatorKind,
    pub title: &'static str,
    pub y_axis: &'static str,
    pub timestamps: Vec<DateTime<Utc>>,
    pub traces: Vec<Trace>,
}

impl IndicatorChart {
    pub fn build(kind: IndicatorKind, analysis: &Analysis) -> Self {
        let set = &analysis.indicators;
        let (title, y_axis, traces) = match kind {
            IndicatorKind::Rsi => (
                "RSI Indicator",
                "RSI Value",
                vec![Trace::new("RSI", set.get(IndicatorName::Rsi))],
            ),
            IndicatorKind::Macd => (
                "MACD Indicator",
                "MACD Value",
                vec![
                    Trace::new("MACD", set.get(IndicatorName::Macd)),
                    Trace::new("Signal", set.get(IndicatorName::Signal)),
                ],
            ),
            IndicatorKind::Bollinger => {
                let price: Series = analysis.bars.iter().map(|b| Some(b.close)).collect();
                (
                    "Bollinger Bands",
                    "Price",
                    vec![
                        Trace::new("Price", &price),
                        Trace::new("BB Upper", set.get(IndicatorName::BbUpper)),
                        Trace::new("BB Middle", set.get(IndicatorName::BbMiddle)),
                        Trace::new("BB Lower", set.get(IndicatorName::BbLower)),
                    ],
                )
            }
            IndicatorKind::SupportResistance => (
                "Support and Resistance Levels",
                "Price",
                vec![
                    Trace::new("Support", set.get(IndicatorName::Support)),
                    Trace::new("Resistance", set.get(IndicatorName::Resistance)),
                ],
            ),
        };

        Self {
            kind,
            title,
            y_axis,
            timestamps: analysis.bars.iter().map(|b| b.timestamp).collect(),
            traces,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HeatmapChart {
    pub title: &'static str,
    pub labels: Vec<&'static str>,
    pub changes: Vec<Option<f64>>,
}

impl HeatmapChart {
    pub fn from_rows(rows: &[HeatmapRow]) -> Self {
        Self {
            title: "Crypto Price Movement Heatmap",
            labels: rows.iter().map(|r| r.label).collect(),
            changes: rows.iter().map(|r| r.change).collect(),
        }
    }
}
