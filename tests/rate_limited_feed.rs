//! End-to-end behavior of a cached, rate-limited feed
//!
//! Drives the OKLink client over a scripted transport with the tokio clock
//! paused, so backoff waits and TTL expiry are simulated exactly.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use w3feed::cache::{CacheConfig, TtlCache};
use w3feed::data::OklinkClient;
use w3feed::fetch::{Fetcher, HttpResponse, RetryPolicy, ScriptedTransport};

fn gas_body(price: u64) -> serde_json::Value {
    json!({
        "code": "0",
        "msg": "",
        "data": [{"chainShortName": "eth", "symbol": "ETH", "standardGasPrice": price}]
    })
}

fn client(transport: &ScriptedTransport, cache: &TtlCache) -> OklinkClient<ScriptedTransport> {
    let policy = RetryPolicy::new(3, Duration::from_millis(100)).unwrap();
    OklinkClient::with_fetcher(Fetcher::new(transport.clone(), policy), cache.clone(), "key")
        .with_base_url("https://oklink.test")
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_then_cached_until_ttl() {
    let transport = ScriptedTransport::new()
        .respond_status(429)
        .respond_status(429)
        .respond_json(gas_body(10))
        .respond_json(gas_body(12));
    let cache = TtlCache::new(Duration::from_millis(300_000));
    let oklink = client(&transport, &cache);

    let start = Instant::now();
    let first = oklink.gas_fee("eth").await.unwrap().into_data();
    let waited = start.elapsed();

    assert_eq!(first[0].standard_gas_price, "10");
    assert_eq!(transport.attempts(), 3);
    assert!(
        waited >= Duration::from_millis(300) && waited <= Duration::from_millis(302),
        "waited {:?}",
        waited
    );

    // TTL is measured from when the value was stored, after the backoff
    tokio::time::advance(Duration::from_millis(299_999)).await;
    let cached = oklink.gas_fee("ETH").await.unwrap().into_data();
    assert_eq!(cached[0].standard_gas_price, "10");
    assert_eq!(transport.attempts(), 3);

    tokio::time::advance(Duration::from_millis(2)).await;
    let refreshed = oklink.gas_fee("eth").await.unwrap().into_data();
    assert_eq!(refreshed[0].standard_gas_price, "12");
    assert_eq!(transport.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_leave_cache_empty() {
    let transport = ScriptedTransport::new().otherwise(HttpResponse::new(429, "slow down"));
    let cache = TtlCache::default();

    let err = client(&transport, &cache).gas_fee("eth").await.unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(transport.attempts(), 4);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_shares_one_upstream_call() {
    let transport = ScriptedTransport::new().otherwise(HttpResponse::ok_json(&gas_body(7)));
    let cache = TtlCache::with_config(CacheConfig {
        single_flight: true,
        ..CacheConfig::default()
    });
    let oklink = client(&transport, &cache);

    let (a, b, c) = tokio::join!(oklink.gas_fee("eth"), oklink.gas_fee("eth"), oklink.gas_fee("eth"));

    for result in [a, b, c] {
        assert_eq!(result.unwrap().into_data()[0].standard_gas_price, "7");
    }
    assert_eq!(transport.attempts(), 1);
}
