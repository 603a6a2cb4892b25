//! Market dashboard aggregation
//!
//! Loads every feed concurrently and degrades each failure to an empty value,
//! so one broken upstream never takes the whole dashboard down.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};

use super::market::{FearGreedResponse, MarketClient, NewsItem, PriceData, DEFAULT_FEAR_GREED_LIMIT};
use super::oklink::{
    BlockchainInfo, ExchangeData, GasFeeData, HashRateData, OklinkClient, TransactionResponse,
    TRACKED_CHAINS,
};
use crate::fetch::{FetchError, ReqwestTransport, Transport};

/// How often the dashboard is reloaded in watch mode
pub const DASHBOARD_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before the chain info request, spacing it from the hash rate request
const BLOCKCHAIN_INFO_STAGGER: Duration = Duration::from_millis(500);

/// Delay before the large transaction requests
const LARGE_TX_STAGGER: Duration = Duration::from_millis(1000);

/// Number of coins in the market overview
const MARKET_OVERVIEW_SIZE: usize = 10;

/// Coins left out of the market overview
const MARKET_OVERVIEW_EXCLUDED: [&str; 1] = ["SUI"];

/// Default exchange for the reserves widget
pub const DEFAULT_EXCHANGE: &str = "Binance";

/// Everything the dashboard shows, as of `fetched_at`
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub news: Vec<NewsItem>,
    pub prices: Vec<PriceData>,
    pub fear_greed: FearGreedResponse,
    pub hash_rate: Vec<HashRateData>,
    pub blockchain_info: Vec<BlockchainInfo>,
    /// Gas fees keyed by chain short name
    pub gas_fees: BTreeMap<String, Vec<GasFeeData>>,
    /// Large transfers keyed by chain short name
    pub large_transactions: BTreeMap<String, Vec<TransactionResponse>>,
    pub exchange: String,
    pub exchange_reserves: Vec<ExchangeData>,
    /// Top coins from `prices`, excluding delisted ones
    pub market_overview: Vec<PriceData>,
}

fn market_overview(prices: &[PriceData]) -> Vec<PriceData> {
    prices
        .iter()
        .filter(|coin| !MARKET_OVERVIEW_EXCLUDED.contains(&coin.name.as_str()))
        .take(MARKET_OVERVIEW_SIZE)
        .cloned()
        .collect()
}

/// Returns the value, or logs the failure and returns the empty default
fn or_empty<V: Default>(result: Result<V, FetchError>, feed: &str) -> V {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!(feed, error = %e, "failed to load feed");
            V::default()
        }
    }
}

/// Loads all dashboard feeds
#[derive(Debug, Clone)]
pub struct Dashboard<T = ReqwestTransport> {
    oklink: OklinkClient<T>,
    market: MarketClient<T>,
    exchange: String,
    fear_greed_limit: u32,
}

impl<T: Transport> Dashboard<T> {
    pub fn new(oklink: OklinkClient<T>, market: MarketClient<T>) -> Self {
        Self {
            oklink,
            market,
            exchange: DEFAULT_EXCHANGE.to_string(),
            fear_greed_limit: DEFAULT_FEAR_GREED_LIMIT,
        }
    }

    /// Sets the exchange shown in the reserves widget
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Loads every feed concurrently
    ///
    /// Never fails: each feed that errors is logged and left empty.
    pub async fn load(&self) -> DashboardSnapshot {
        let gas_fees = join_all(TRACKED_CHAINS.iter().map(|chain| self.oklink.gas_fee(chain)));
        let blockchain_info = async {
            tokio::time::sleep(BLOCKCHAIN_INFO_STAGGER).await;
            self.oklink.blockchain_info().await
        };
        let large_transactions = async {
            tokio::time::sleep(LARGE_TX_STAGGER).await;
            join_all(
                TRACKED_CHAINS
                    .iter()
                    .map(|chain| self.oklink.large_transactions(chain)),
            )
            .await
        };

        let (news, prices, fear_greed, hash_rate, blockchain_info, gas_fees, large_transactions, reserves) = futures::join!(
            self.market.news(),
            self.market.prices(),
            self.market.fear_greed(self.fear_greed_limit),
            self.oklink.hash_rate(),
            blockchain_info,
            gas_fees,
            large_transactions,
            self.oklink.exchange_reserves(&self.exchange),
        );

        let gas_fees = TRACKED_CHAINS
            .iter()
            .zip(gas_fees)
            .map(|(chain, result)| {
                let rows = or_empty(result.map(|response| response.into_data()), "gas_fee");
                (chain.to_string(), rows)
            })
            .collect();
        let large_transactions = TRACKED_CHAINS
            .iter()
            .zip(large_transactions)
            .map(|(chain, result)| (chain.to_string(), or_empty(result, "large_transactions")))
            .collect();

        let prices = or_empty(prices, "prices");
        let snapshot = DashboardSnapshot {
            fetched_at: Utc::now(),
            news: or_empty(news, "news"),
            market_overview: market_overview(&prices),
            prices,
            fear_greed: or_empty(fear_greed, "fear_greed"),
            hash_rate: or_empty(hash_rate, "hash_rate"),
            blockchain_info: or_empty(blockchain_info, "blockchain_info"),
            gas_fees,
            large_transactions,
            exchange: self.exchange.clone(),
            exchange_reserves: or_empty(reserves.map(|response| response.into_data()), "exchange_reserves"),
        };

        info!(
            news = snapshot.news.len(),
            prices = snapshot.prices.len(),
            reserves = snapshot.exchange_reserves.len(),
            "dashboard loaded"
        );
        snapshot
    }

    /// Reloads the dashboard every `interval` until `shutdown` completes
    ///
    /// The first load starts immediately. `shutdown` is raced against both the
    /// wait between loads and the load itself, so it is honored mid-load; the
    /// interrupted snapshot is discarded. An error from `on_snapshot` stops the
    /// loop and is returned.
    ///
    /// # Returns
    /// * `Ok(n)` - number of snapshots delivered before shutdown
    pub async fn watch<S, F, E>(&self, interval: Duration, shutdown: S, mut on_snapshot: F) -> Result<usize, E>
    where
        S: Future,
        F: FnMut(&DashboardSnapshot) -> Result<(), E>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(interval);
        let mut delivered = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break,
                snapshot = self.load() => {
                    on_snapshot(&snapshot)?;
                    delivered += 1;
                }
            }
        }

        info!(delivered, "dashboard watch stopped");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::fetch::{Fetcher, HttpResponse, RetryPolicy, ScriptedTransport};
    use serde_json::json;

    fn dashboard(transport: &ScriptedTransport) -> Dashboard<ScriptedTransport> {
        let policy = RetryPolicy::new(1, Duration::from_millis(10)).unwrap();
        let fetcher = Fetcher::new(transport.clone(), policy);
        let oklink = OklinkClient::with_fetcher(fetcher.clone(), TtlCache::default(), "key")
            .with_base_url("https://oklink.test");
        let market = MarketClient::with_fetcher(fetcher).with_urls("https://site.test", "https://fng.test/");
        Dashboard::new(oklink, market)
    }

    fn price(name: &str) -> serde_json::Value {
        json!({
            "marketCap": 1.0, "high24h": "1", "totalSupply": "1", "volume24h": 1.0,
            "name": name, "id": 1, "maxSupply": "1", "low24h": "1",
            "circulatingSupply": "1", "lastPrice": "1"
        })
    }

    fn ok(body: serde_json::Value) -> HttpResponse {
        HttpResponse::ok_json(&body)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_feeds_failing_yields_empty_snapshot() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(500, ""));

        let snapshot = dashboard(&transport).load().await;

        assert!(snapshot.news.is_empty());
        assert!(snapshot.prices.is_empty());
        assert!(snapshot.fear_greed.data.is_empty());
        assert!(snapshot.hash_rate.is_empty());
        assert!(snapshot.blockchain_info.is_empty());
        assert!(snapshot.exchange_reserves.is_empty());
        assert_eq!(snapshot.gas_fees.len(), 3);
        assert!(snapshot.gas_fees.values().all(Vec::is_empty));
        assert!(snapshot.large_transactions.values().all(Vec::is_empty));
        assert_eq!(snapshot.exchange, "Binance");
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_working_feeds() {
        let transport = ScriptedTransport::new()
            .route("/getAllNews", ok(json!({"data": [{"create_time": "t", "id": 1, "title": "Hello", "content": ""}]})))
            .route("/fee?chainShortName=eth", ok(json!({"code": "0", "msg": "", "data": [{"symbol": "ETH"}]})))
            .route("/proof-of-reserves", ok(json!({"code": "0", "msg": "", "data": [{"institutionName": "OKX", "totalBalance": "1"}]})))
            .otherwise(HttpResponse::new(503, ""));

        let snapshot = dashboard(&transport).with_exchange("OKX").load().await;

        assert_eq!(snapshot.news[0].title, "Hello");
        assert_eq!(snapshot.gas_fees["eth"][0].symbol, "ETH");
        assert!(snapshot.gas_fees["btc"].is_empty());
        assert_eq!(snapshot.exchange_reserves[0].institution_name, "OKX");
        assert!(snapshot.prices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_staggered() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(500, ""));
        let start = tokio::time::Instant::now();

        dashboard(&transport).load().await;

        let requests = transport.requests();
        let times = transport.request_times();
        let at = |fragment: &str| {
            requests
                .iter()
                .zip(&times)
                .find(|(request, _)| request.url.contains(fragment))
                .map(|(_, time)| *time - start)
                .unwrap()
        };

        assert_eq!(at("/hashes"), Duration::ZERO);
        assert!(at("/blockchain/info") >= BLOCKCHAIN_INFO_STAGGER);
        assert!(at("/large-transaction-list") >= LARGE_TX_STAGGER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_overview_filters_and_limits() {
        let mut coins: Vec<serde_json::Value> = vec![price("SUI")];
        coins.extend((0..12).map(|i| price(&format!("C{}", i))));
        let transport = ScriptedTransport::new()
            .route("/getAllPrice", ok(json!({ "data": coins })))
            .otherwise(HttpResponse::new(500, ""));

        let snapshot = dashboard(&transport).load().await;
        let overview = &snapshot.market_overview;

        assert_eq!(snapshot.prices.len(), 13);
        assert_eq!(overview.len(), 10);
        assert!(overview.iter().all(|coin| coin.name != "SUI"));
        assert_eq!(overview[0].name, "C0");

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["market_overview"].as_array().map(Vec::len), Some(10));
        assert_eq!(json["market_overview"][9]["name"], "C9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stops_during_a_load() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(500, ""));
        let dashboard = dashboard(&transport);
        let start = tokio::time::Instant::now();
        let mut seen = 0;

        // Second load starts at 30 s and cannot finish before the 1 s stagger
        let shutdown = tokio::time::sleep(Duration::from_millis(30_300));
        let delivered = dashboard
            .watch(DASHBOARD_REFRESH_INTERVAL, shutdown, |_| {
                seen += 1;
                Ok::<_, String>(())
            })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(delivered, 1);
        assert_eq!(seen, 1);
        assert!(
            elapsed >= Duration::from_millis(30_300) && elapsed < Duration::from_millis(30_310),
            "stopped after {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stops_between_loads() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(500, ""));
        let start = tokio::time::Instant::now();

        let delivered = dashboard(&transport)
            .watch(
                DASHBOARD_REFRESH_INTERVAL,
                tokio::time::sleep(Duration::from_secs(65)),
                |_| Ok::<_, String>(()),
            )
            .await
            .unwrap();

        // Loads at 0 s, 30 s and 60 s
        assert_eq!(delivered, 3);
        assert!(start.elapsed() < Duration::from_millis(65_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_returns_snapshot_handler_error() {
        let transport = ScriptedTransport::new().otherwise(HttpResponse::new(500, ""));
        let mut calls = 0;

        let result = dashboard(&transport)
            .watch(
                DASHBOARD_REFRESH_INTERVAL,
                std::future::pending::<()>(),
                |_| {
                    calls += 1;
                    Err("stdout closed".to_string())
                },
            )
            .await;

        assert_eq!(result, Err("stdout closed".to_string()));
        assert_eq!(calls, 1);
    }
}
