use crate::error::DashboardError;
use crate::market::{Interval, Pair, Span};
use crate::refresh::IndicatorKind;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;

// CONFIGURATION STRUCTS

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,  // e.g., "https://www.bitstamp.net/api/v2"
    pub timeout_secs: u64, // per request
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.bitstamp.net/api/v2".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    /// Upper bound on heatmap fetches in flight at once.
    pub heatmap_concurrency: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            heatmap_concurrency: 4,
        }
    }
}

/// Selections the dashboard starts with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct DefaultSelection {
    pub pair: Pair,
    pub interval: Interval,
    pub span: Span,
    pub indicator: IndicatorKind,
}

impl Default for DefaultSelection {
    fn default() -> Self {
        Self {
            pair: Pair::Btcusd,
            interval: Interval::ThreeMinutes,
            span: Span::Thirty,
            indicator: IndicatorKind::Rsi,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub refresh: RefreshConfig,
    pub defaults: DefaultSelection,
    /// Heatmap columns, rendered in this order.
    pub tracked_pairs: Vec<Pair>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            refresh: RefreshConfig::default(),
            defaults: DefaultSelection::default(),
            tracked_pairs: Pair::ALL.to_vec(),
        }
    }
}

impl AppConfig {
    /// Rejects settings the dashboard cannot run with. Enumerated values
    /// (pairs, intervals, spans) are already checked while deserializing.
    pub fn validate(&self) -> Result<(), DashboardError> {
        if self.refresh.interval_secs == 0 {
            return Err(DashboardError::Config("refresh.interval_secs must be positive".into()));
        }
        if self.refresh.heatmap_concurrency == 0 {
            return Err(DashboardError::Config(
                "refresh.heatmap_concurrency must be positive".into(),
            ));
        }
        if self.exchange.timeout_secs == 0 {
            return Err(DashboardError::Config("exchange.timeout_secs must be positive".into()));
        }
        if self.tracked_pairs.is_empty() {
            return Err(DashboardError::Config("tracked_pairs must not be empty".into()));
        }
        Ok(())
    }

    /// Loads `config.json` from storage, falling back to defaults when the
    /// file does not exist. A present but invalid file is an error.
    pub async fn load(storage: &AsyncStorageManager) -> anyhow::Result<Self> {
        let config = if storage.exists("config").await {
            storage.load("config").await?
        } else {
            tracing::info!(dir = ?storage.base_dir, "no config.json found, using defaults");
            AppConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory next to the binary
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Resolves `relative_path` against the directory of the running
    /// executable and creates it if needed.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }

        Ok(Self { base_dir })
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.path(&format!("{}.json", name)))
            .await
            .unwrap_or(false)
    }

    /// Reads `<name>.json` and deserializes it into `T`.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let path = self.path(&format!("{}.json", name));

        // serde_json validates UTF-8 while parsing, so read raw bytes.
        let content = fs::read(&path).await?;

        let data = serde_json::from_slice(&content)
            .map_err(|e| DashboardError::Config(format!("{}: {e}", path.display())))?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_track_every_pair_in_order() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracked_pairs, Pair::ALL.to_vec());
        assert_eq!(config.refresh.interval_secs, 10);
        assert_eq!(config.defaults.interval, Interval::ThreeMinutes);
        assert_eq!(config.defaults.span, Span::Thirty);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"tracked_pairs": ["ethusd", "btcusd"], "defaults": {"interval": 3600, "indicator": "MACD"}}"#,
        )
        .unwrap();

        assert_eq!(config.tracked_pairs, vec![Pair::Ethusd, Pair::Btcusd]);
        assert_eq!(config.defaults.interval, Interval::OneHour);
        assert_eq!(config.defaults.indicator, IndicatorKind::Macd);
        assert_eq!(config.defaults.pair, Pair::Btcusd);
        assert_eq!(config.exchange, ExchangeConfig::default());
    }

    #[test]
    fn unsupported_values_fail_fast() {
        assert!(serde_json::from_str::<AppConfig>(r#"{"tracked_pairs": ["btceur"]}"#).is_err());
        assert!(serde_json::from_str::<AppConfig>(r#"{"defaults": {"interval": 300}}"#).is_err());
        assert!(serde_json::from_str::<AppConfig>(r#"{"defaults": {"span": 25}}"#).is_err());

        let empty: AppConfig = serde_json::from_str(r#"{"tracked_pairs": []}"#).unwrap();
        assert!(matches!(empty.validate(), Err(DashboardError::Config(_))));

        let mut zero = AppConfig::default();
        zero.refresh.heatmap_concurrency = 0;
        assert!(zero.validate().is_err());
    }
}
