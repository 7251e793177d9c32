use crate::market::Pair;
use thiserror::Error;

/// Failures raised by the fetch / indicator / heatmap pipeline.
///
/// Everything except [`DashboardError::Config`] is recoverable at the refresh
/// boundary: the dashboard keeps its previous snapshot and reports the error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DashboardError {
    #[error("market data unavailable for {pair}: {reason}")]
    DataUnavailable { pair: Pair, reason: String },

    #[error("insufficient history: {available} bars available, {required} required")]
    InsufficientHistory { required: usize, available: usize },

    #[error("invalid display range [{start}, {end}) over {available} bars")]
    InvalidRange {
        start: usize,
        end: usize,
        available: usize,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DashboardError {
    pub fn unavailable(pair: Pair, reason: impl ToString) -> Self {
        Self::DataUnavailable {
            pair,
            reason: reason.to_string(),
        }
    }
}
