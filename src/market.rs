use crate::config::ExchangeConfig;
use crate::error::DashboardError;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Extra bars requested on top of the visible span so the longest rolling
/// indicator (RSI, 14 periods) is warmed up on the first visible bar.
pub const LOOKBACK_PADDING: usize = 14;

// --- Enumerated selections ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pair {
    Btcusd,
    Ethusd,
    Usdtusd,
    Solusd,
    Usdcusd,
    Xrpusd,
    Dogeusd,
    Adausd,
    Avaxusd,
    Shibusd,
}

impl Pair {
    pub const ALL: [Pair; 10] = [
        Pair::Btcusd,
        Pair::Ethusd,
        Pair::Usdtusd,
        Pair::Solusd,
        Pair::Usdcusd,
        Pair::Xrpusd,
        Pair::Dogeusd,
        Pair::Adausd,
        Pair::Avaxusd,
        Pair::Shibusd,
    ];

    /// Identifier used in the exchange URL path.
    pub fn id(self) -> &'static str {
        match self {
            Pair::Btcusd => "btcusd",
            Pair::Ethusd => "ethusd",
            Pair::Usdtusd => "usdtusd",
            Pair::Solusd => "solusd",
            Pair::Usdcusd => "usdcusd",
            Pair::Xrpusd => "xrpusd",
            Pair::Dogeusd => "dogeusd",
            Pair::Adausd => "adausd",
            Pair::Avaxusd => "avaxusd",
            Pair::Shibusd => "shibusd",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Pair::Btcusd => "BTC/USD",
            Pair::Ethusd => "ETH/USD",
            Pair::Usdtusd => "USDT/USD",
            Pair::Solusd => "SOL/USD",
            Pair::Usdcusd => "USDC/USD",
            Pair::Xrpusd => "XRP/USD",
            Pair::Dogeusd => "DOGE/USD",
            Pair::Adausd => "ADA/USD",
            Pair::Avaxusd => "AVAX/USD",
            Pair::Shibusd => "SHIB/USD",
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Pair {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pair::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DashboardError::Config(format!("unsupported trading pair `{s}`")))
    }
}

/// Bar interval, carried as seconds on the wire and in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Interval {
    OneMinute,
    ThreeMinutes,
    OneHour,
    OneDay,
}

impl Interval {
    pub const ALL: [Interval; 4] = [
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::OneHour,
        Interval::OneDay,
    ];

    pub fn seconds(self) -> u32 {
        match self {
            Interval::OneMinute => 60,
            Interval::ThreeMinutes => 180,
            Interval::OneHour => 3600,
            Interval::OneDay => 86400,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Interval::OneMinute => "1 Minute",
            Interval::ThreeMinutes => "3 Minutes",
            Interval::OneHour => "1 Hour",
            Interval::OneDay => "1 Day",
        }
    }
}

impl TryFrom<u32> for Interval {
    type Error = DashboardError;

    fn try_from(seconds: u32) -> Result<Self, Self::Error> {
        Interval::ALL
            .into_iter()
            .find(|i| i.seconds() == seconds)
            .ok_or_else(|| DashboardError::Config(format!("unsupported interval {seconds}s")))
    }
}

impl From<Interval> for u32 {
    fn from(interval: Interval) -> Self {
        interval.seconds()
    }
}

/// Number of bars the user wants on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum Span {
    Twenty,
    Thirty,
    Fifty,
    Seventy,
}

impl Span {
    pub const ALL: [Span; 4] = [Span::Twenty, Span::Thirty, Span::Fifty, Span::Seventy];

    pub fn bars(self) -> usize {
        match self {
            Span::Twenty => 20,
            Span::Thirty => 30,
            Span::Fifty => 50,
            Span::Seventy => 70,
        }
    }
}

impl TryFrom<usize> for Span {
    type Error = DashboardError;

    fn try_from(bars: usize) -> Result<Self, Self::Error> {
        Span::ALL
            .into_iter()
            .find(|s| s.bars() == bars)
            .ok_or_else(|| DashboardError::Config(format!("unsupported span {bars}")))
    }
}

impl From<Span> for usize {
    fn from(span: Span) -> Self {
        span.bars()
    }
}

// --- Bars ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Bars for one pair from a single fetch, strictly increasing by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    pub pair: Pair,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }
}

// --- Wire format & lenient deserialization ---

#[derive(Deserialize, Debug)]
struct OhlcResponse {
    data: OhlcData,
}

#[derive(Deserialize, Debug)]
struct OhlcData {
    #[serde(default)]
    ohlc: Vec<RawBar>,
}

#[derive(Deserialize, Debug)]
struct RawBar {
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    timestamp: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    close: Option<f64>,
}

impl RawBar {
    fn into_bar(self) -> Option<Bar> {
        let ts = self.timestamp.filter(|t| t.fract() == 0.0)?;
        Some(Bar {
            timestamp: DateTime::from_timestamp(ts as i64, 0)?,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
        })
    }
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v).filter(|v| v.is_finite()))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    // Unparseable text marks the row as unusable instead of failing the whole payload.
    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(v.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// Decodes an OHLC response body and cleans it into a [`BarSeries`]:
/// incomplete rows are dropped, rows are ordered by timestamp and duplicate
/// timestamps keep the last row seen.
pub fn parse_ohlc(pair: Pair, body: &[u8]) -> Result<BarSeries, DashboardError> {
    let response: OhlcResponse = serde_json::from_slice(body)
        .map_err(|e| DashboardError::unavailable(pair, format!("malformed payload: {e}")))?;

    let raw_len = response.data.ohlc.len();
    let mut bars: Vec<Bar> = response
        .data
        .ohlc
        .into_iter()
        .filter_map(RawBar::into_bar)
        .collect();

    if bars.len() < raw_len {
        tracing::debug!(%pair, dropped = raw_len - bars.len(), "dropped incomplete OHLC rows");
    }

    // Stable sort keeps arrival order among equal timestamps, so dedup on the
    // reversed run retains the last occurrence.
    bars.sort_by_key(|b| b.timestamp);
    bars.reverse();
    bars.dedup_by_key(|b| b.timestamp);
    bars.reverse();

    if bars.is_empty() {
        return Err(DashboardError::unavailable(pair, "empty OHLC payload"));
    }

    Ok(BarSeries { pair, bars })
}

// --- Sources ---

/// Anything that can produce raw bars for a pair. `limit` is the exact
/// number of bars requested from upstream.
pub trait BarSource {
    fn fetch_bars(
        &self,
        pair: Pair,
        interval: Interval,
        limit: usize,
    ) -> impl Future<Output = Result<BarSeries, DashboardError>> + Send;
}

/// Fetches `bar_count` visible bars plus [`LOOKBACK_PADDING`] warm-up bars.
/// `bar_count` must be positive.
pub async fn fetch<S: BarSource>(
    source: &S,
    pair: Pair,
    interval: Interval,
    bar_count: usize,
) -> Result<BarSeries, DashboardError> {
    source
        .fetch_bars(pair, interval, bar_count + LOOKBACK_PADDING)
        .await
}

#[derive(Clone)]
pub struct BitstampClient {
    client: Client,
    base_url: String,
}

impl BitstampClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, DashboardError> {
        let client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DashboardError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, pair: Pair, interval: Interval, limit: usize) -> reqwest::Result<Vec<u8>> {
        let url = format!("{}/ohlc/{}/", self.base_url, pair.id());
        let query = [
            ("step", interval.seconds().to_string()),
            ("limit", limit.to_string()),
        ];

        let response = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }
}

impl BarSource for BitstampClient {
    fn fetch_bars(
        &self,
        pair: Pair,
        interval: Interval,
        limit: usize,
    ) -> impl Future<Output = Result<BarSeries, DashboardError>> + Send {
        async move {
            tracing::debug!(%pair, step = interval.seconds(), limit, "requesting OHLC bars");
            let body = self
                .request(pair, interval, limit)
                .await
                .map_err(|e| DashboardError::unavailable(pair, e))?;
            parse_ohlc(pair, &body)
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;

    /// In-memory source: each pair serves its configured bars (latest
    /// `limit` of them) or fails with `DataUnavailable`.
    #[derive(Default)]
    pub struct StubSource {
        pub bars: HashMap<Pair, Vec<Bar>>,
    }

    impl StubSource {
        pub fn with_closes(mut self, pair: Pair, closes: &[f64]) -> Self {
            self.bars.insert(pair, bars_from_closes(closes));
            self
        }
    }

    impl BarSource for StubSource {
        fn fetch_bars(
            &self,
            pair: Pair,
            _interval: Interval,
            limit: usize,
        ) -> impl Future<Output = Result<BarSeries, DashboardError>> + Send {
            let result = match self.bars.get(&pair) {
                Some(bars) if !bars.is_empty() => {
                    let skip = bars.len().saturating_sub(limit);
                    Ok(BarSeries {
                        pair,
                        bars: bars[skip..].to_vec(),
                    })
                }
                _ => Err(DashboardError::unavailable(pair, "connection refused")),
            };
            async move { result }
        }
    }

    /// One-minute bars whose high/low sit one unit around the close.
    pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: DateTime::from_timestamp(1_700_000_000 + 60 * i as i64, 0)
                    .unwrap_or_default(),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
            })
            .collect()
    }
}
