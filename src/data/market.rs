//! Market data client: news, prices, and the Fear & Greed index
//!
//! News and prices come from the site's own backend; the Fear & Greed index
//! comes from alternative.me.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::fetch::{FetchError, Fetcher, HttpRequest, ReqwestTransport, RetryPolicy, Transport};

/// Base URL of the site backend
const ALLINWEB3_BASE_URL: &str = "https://allinweb3.com";

/// Fear & Greed index endpoint
const FEAR_GREED_URL: &str = "https://api.alternative.me/fng/";

/// Number of daily readings requested by default
pub const DEFAULT_FEAR_GREED_LIMIT: u32 = 10;

/// A news article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub create_time: String,
    pub id: u64,
    pub title: String,
    pub content: String,
}

/// Market snapshot for a single coin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceData {
    pub market_cap: f64,
    pub high24h: String,
    pub total_supply: String,
    pub volume24h: f64,
    pub name: String,
    pub id: u64,
    pub max_supply: String,
    pub low24h: String,
    pub circulating_supply: String,
    pub last_price: String,
}

/// One daily Fear & Greed reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FearGreedData {
    /// Index value, 0 (extreme fear) to 100 (extreme greed), as text
    pub value: String,
    pub value_classification: String,
    /// Unix seconds, as text
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_until_update: Option<String>,
}

impl FearGreedData {
    /// Index value as a number
    pub fn score(&self) -> Option<u8> {
        self.value.trim().parse().ok()
    }

    /// When the reading was taken
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = self.timestamp.trim().parse().ok()?;
        DateTime::from_timestamp(secs, 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FearGreedMetadata {
    pub error: Option<String>,
}

/// Fear & Greed index response
///
/// `Default` is the empty response widgets render when the feed is down.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FearGreedResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: Vec<FearGreedData>,
    #[serde(default)]
    pub metadata: FearGreedMetadata,
}

impl FearGreedResponse {
    /// Most recent reading, if any
    pub fn latest(&self) -> Option<&FearGreedData> {
        self.data.first()
    }
}

/// `{ "data": [...] }` envelope used by the site backend
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Option<Vec<T>>,
}

/// Client for news, prices, and sentiment feeds
#[derive(Debug, Clone)]
pub struct MarketClient<T = ReqwestTransport> {
    fetcher: Fetcher<T>,
    base_url: String,
    fear_greed_url: String,
}

impl MarketClient<ReqwestTransport> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_fetcher(Fetcher::with_policy(policy))
    }
}

impl<T: Transport> MarketClient<T> {
    pub fn with_fetcher(fetcher: Fetcher<T>) -> Self {
        Self {
            fetcher,
            base_url: ALLINWEB3_BASE_URL.to_string(),
            fear_greed_url: FEAR_GREED_URL.to_string(),
        }
    }

    /// Overrides both upstream URLs (for testing)
    pub fn with_urls(mut self, base_url: impl Into<String>, fear_greed_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.fear_greed_url = fear_greed_url.into();
        self
    }

    /// Fetches all news articles
    pub async fn news(&self) -> Result<Vec<NewsItem>, FetchError> {
        let request = HttpRequest::get(format!("{}/getAllNews", self.base_url));
        let envelope: DataEnvelope<NewsItem> = self.fetcher.fetch_json(&request).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// Fetches prices for all tracked coins
    pub async fn prices(&self) -> Result<Vec<PriceData>, FetchError> {
        let request = HttpRequest::get(format!("{}/getAllPrice", self.base_url));
        let envelope: DataEnvelope<PriceData> = self.fetcher.fetch_json(&request).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// Fetches the last `limit` daily Fear & Greed readings, newest first
    pub async fn fear_greed(&self, limit: u32) -> Result<FearGreedResponse, FetchError> {
        let url = Url::parse_with_params(&self.fear_greed_url, &[("limit", limit.to_string())])
            .map_err(|e| FetchError::InvalidConfig(format!("bad Fear & Greed URL: {}", e)))?;
        self.fetcher.fetch_json(&HttpRequest::get(url.as_str())).await
    }
}
