//! OKLink explorer API client
//!
//! Fetches exchange proof-of-reserves, gas fees, and Bitcoin network stats.
//! Reserves and gas fees are cached per parameter; the network stats endpoints
//! are only retried.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::{cache_key, TtlCache};
use crate::fetch::{FetchError, Fetcher, HttpRequest, ReqwestTransport, RetryPolicy, Transport};

/// Base URL for the OKLink v5 API
const OKLINK_BASE_URL: &str = "https://www.oklink.com/api/v5";

/// Header carrying the OKLink API key
const ACCESS_KEY_HEADER: &str = "Ok-Access-Key";

/// Envelope code for a successful response
const SUCCESS_CODE: &str = "0";

/// Number of rows requested from the large-transaction list
const LARGE_TX_LIMIT: &str = "5";

/// Exchanges with published proof-of-reserves
pub const SUPPORTED_EXCHANGES: [&str; 9] = [
    "Binance",
    "OKX",
    "Bitget",
    "KuCoin",
    "Crypto.com",
    "Bybit",
    "Deribit",
    "Bitfinex",
    "Gate.io",
];

/// Chains shown in the gas fee and large transaction widgets
pub const TRACKED_CHAINS: [&str; 3] = ["btc", "eth", "bsc"];

/// Standard OKLink response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OklinkResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    pub data: Option<Vec<T>>,
}

impl<T> OklinkResponse<T> {
    /// Returns the payload rows, or an empty list if there were none
    pub fn into_data(self) -> Vec<T> {
        self.data.unwrap_or_default()
    }

    fn ensure_success(self) -> Result<Self, FetchError> {
        if self.code == SUCCESS_CODE {
            Ok(self)
        } else {
            Err(FetchError::Api {
                code: self.code,
                msg: self.msg,
            })
        }
    }
}

/// Balance of one asset held by an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDetail {
    pub symbol: String,
    pub balance: String,
    pub balance_usd: String,
    pub change: String,
}

/// Proof-of-reserves summary for an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeData {
    pub institution_name: String,
    pub total_balance: String,
    #[serde(default)]
    pub balance_details: Vec<BalanceDetail>,
}

/// Fee recommendations for a chain, every field kept as text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFeeData {
    pub chain_full_name: String,
    pub chain_short_name: String,
    pub symbol: String,
    pub best_transaction_fee: String,
    pub best_transaction_fee_sat: String,
    pub recommended_gas_price: String,
    pub rapid_gas_price: String,
    pub standard_gas_price: String,
    pub slow_gas_price: String,
    pub base_fee: String,
    pub gas_used_ratio: String,
}

impl GasFeeData {
    /// Builds a record from loosely typed upstream JSON
    fn from_raw(raw: &Map<String, Value>) -> Self {
        let text = |field: &str| loose_text(raw.get(field));
        Self {
            chain_full_name: text("chainFullName"),
            chain_short_name: text("chainShortName"),
            symbol: text("symbol"),
            best_transaction_fee: text("bestTransactionFee"),
            best_transaction_fee_sat: text("bestTransactionFeeSat"),
            recommended_gas_price: text("recommendedGasPrice"),
            rapid_gas_price: text("rapidGasPrice"),
            standard_gas_price: text("standardGasPrice"),
            slow_gas_price: text("slowGasPrice"),
            base_fee: text("baseFee"),
            gas_used_ratio: text("gasUsedRatio"),
        }
    }
}

/// Network hash rate for a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashRateData {
    pub chain_full_name: String,
    pub chain_short_name: String,
    pub symbol: String,
    pub hash_rate: String,
    pub hash_rate_change24h: String,
}

/// General chain statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainInfo {
    pub chain_full_name: String,
    pub chain_short_name: String,
    pub symbol: String,
    pub rank: String,
    pub mineable: bool,
    pub algorithm: String,
    pub consensus: String,
    pub diff_estimation: String,
    pub current_diff: String,
    pub diff_adjust_time: String,
    pub circulating_supply: String,
    pub total_supply: String,
    pub tps: String,
    pub last_height: String,
    pub last_block_time: String,
    pub issue_date: String,
}

/// A single large on-chain transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub txid: String,
    pub block_hash: String,
    pub height: String,
    pub transaction_time: String,
    pub input: String,
    pub output: String,
    pub is_input_contract: bool,
    pub is_output_contract: bool,
    pub amount: String,
    pub transaction_symbol: String,
    pub txfee: String,
    pub method_id: String,
    pub transaction_type: String,
    pub state: String,
}

/// One page of the large-transaction list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub page: String,
    pub limit: String,
    pub total_page: String,
    pub chain_full_name: String,
    pub chain_short_name: String,
    #[serde(default)]
    pub transaction_list: Vec<Transaction>,
}

/// Client for the OKLink explorer API
#[derive(Debug, Clone)]
pub struct OklinkClient<T = ReqwestTransport> {
    fetcher: Fetcher<T>,
    cache: TtlCache,
    api_key: String,
    base_url: String,
}

impl OklinkClient<ReqwestTransport> {
    /// Creates a client over a default reqwest transport
    pub fn new(api_key: impl Into<String>, cache: TtlCache, policy: RetryPolicy) -> Self {
        Self::with_fetcher(Fetcher::with_policy(policy), cache, api_key)
    }
}

impl<T: Transport> OklinkClient<T> {
    /// Creates a client over an existing fetcher
    pub fn with_fetcher(fetcher: Fetcher<T>, cache: TtlCache, api_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            cache,
            api_key: api_key.into(),
            base_url: OKLINK_BASE_URL.to_string(),
        }
    }

    /// Overrides the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, path: &str, params: &[(&str, &str)]) -> Result<HttpRequest, FetchError> {
        let url = Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| FetchError::InvalidConfig(format!("bad OKLink URL: {}", e)))?;
        Ok(HttpRequest::get(url.as_str()).header(ACCESS_KEY_HEADER, self.api_key.as_str()))
    }

    /// Fetches proof-of-reserves for an exchange (e.g. "Binance")
    ///
    /// Only successful envelopes are cached; any other code is returned as
    /// `FetchError::Api`.
    pub async fn exchange_reserves(
        &self,
        exchange: &str,
    ) -> Result<OklinkResponse<ExchangeData>, FetchError> {
        let key = cache_key("exchange_reserves", exchange);
        self.cache
            .get_or_fetch(&key, move || async move {
                let request =
                    self.request("/explorer/por/proof-of-reserves", &[("institutionName", exchange)])?;
                let response: OklinkResponse<ExchangeData> = self.fetcher.fetch_json(&request).await?;
                response.ensure_success()
            })
            .await
    }

    /// Fetches fee recommendations for a chain (e.g. "eth")
    ///
    /// Every record field is normalized to text before the response is cached.
    pub async fn gas_fee(&self, chain: &str) -> Result<OklinkResponse<GasFeeData>, FetchError> {
        let key = cache_key("gas_fee", chain);
        self.cache
            .get_or_fetch(&key, move || async move {
                let request = self.request("/explorer/blockchain/fee", &[("chainShortName", chain)])?;
                let raw: OklinkResponse<Map<String, Value>> = self.fetcher.fetch_json(&request).await?;
                let raw = raw.ensure_success()?;
                let data = raw
                    .data
                    .map(|rows| rows.iter().map(GasFeeData::from_raw).collect());
                debug!(chain, "normalized gas fee response");
                Ok(OklinkResponse {
                    code: raw.code,
                    msg: raw.msg,
                    data,
                })
            })
            .await
    }

    /// Fetches the Bitcoin network hash rate
    pub async fn hash_rate(&self) -> Result<Vec<HashRateData>, FetchError> {
        let request = self.request("/explorer/blockchain/hashes", &[("chainShortName", "btc")])?;
        let response: OklinkResponse<HashRateData> = self.fetcher.fetch_json(&request).await?;
        Ok(response.into_data())
    }

    /// Fetches Bitcoin chain statistics
    pub async fn blockchain_info(&self) -> Result<Vec<BlockchainInfo>, FetchError> {
        let request = self.request("/explorer/blockchain/info", &[("chainShortName", "btc")])?;
        let response: OklinkResponse<BlockchainInfo> = self.fetcher.fetch_json(&request).await?;
        Ok(response.into_data())
    }

    /// Fetches the most recent large transfers on a chain
    pub async fn large_transactions(&self, chain: &str) -> Result<Vec<TransactionResponse>, FetchError> {
        let request = self.request(
            "/explorer/transaction/large-transaction-list",
            &[("chainShortName", chain), ("limit", LARGE_TX_LIMIT)],
        )?;
        let response: OklinkResponse<TransactionResponse> = self.fetcher.fetch_json(&request).await?;
        Ok(response.into_data())
    }
}

/// Renders a loosely typed JSON field as text
///
/// Missing, null, `false`, zero, and empty strings all become `""`; other
/// scalars use their plain text form.
fn loose_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(true)) => "true".to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}
