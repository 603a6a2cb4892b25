//! Token safety lookups for Solana and Ethereum tokens
//!
//! Solana mints are checked against the rugcheck report API. Ethereum
//! contracts are checked against TokenPocket's security and token info
//! endpoints, and a weighted safety score is derived from the security flags.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::fetch::{FetchError, Fetcher, HttpRequest, ReqwestTransport, RetryPolicy, Transport};

/// Base URL for the rugcheck API
const RUGCHECK_BASE_URL: &str = "https://api.rugcheck.xyz/v1";

/// Base URL for the TokenPocket token API
const TOKENPOCKET_BASE_URL: &str = "https://preserver.mytokenpocket.vip/v1";

/// Ethereum mainnet chain id
const ETHEREUM_CHAIN_ID: &str = "1";

/// Owner address of a contract that has renounced ownership
const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Errors that can occur when checking a token
#[derive(Debug, Error)]
pub enum TokenCheckError {
    /// Address does not match the chain's format
    #[error("Invalid {chain} address format: '{address}'")]
    InvalidAddress { chain: &'static str, address: String },

    /// Upstream request failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Upstream answered with an unexpected payload
    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

/// Returns true if `address` looks like a base58 Solana mint address
pub fn validate_solana_address(address: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9]{32,44}$").expect("valid solana address regex"))
        .is_match(address)
}

/// Returns true if `address` is a 0x-prefixed 20-byte hex address
pub fn validate_evm_address(address: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("valid evm address regex"))
        .is_match(address)
}

/// Treats an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Severity of a rugcheck risk entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    Warn,
    Info,
    Unknown,
}

impl RiskLevel {
    /// Maps a rugcheck `level` string, case-insensitively
    pub fn from_level(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "high" | "danger" => RiskLevel::High,
            "warn" | "warning" => RiskLevel::Warn,
            "info" => RiskLevel::Info,
            _ => RiskLevel::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMeta {
    pub name: String,
    pub symbol: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub update_authority: String,
    #[serde(default)]
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub level: String,
}

impl Risk {
    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_level(&self.level)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub jup_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopHolder {
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSupply {
    #[serde(default)]
    pub supply: f64,
    #[serde(default)]
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFee {
    pub pct: f64,
    pub max_amount: f64,
    pub authority: String,
}

/// Rugcheck report for a Solana token, with defaults filled in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaTokenReport {
    pub mint: String,
    pub token_meta: TokenMeta,
    #[serde(default, deserialize_with = "null_as_default")]
    pub score: f64,
    #[serde(rename = "score_normalised", default, deserialize_with = "null_as_default")]
    pub score_normalised: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub risks: Vec<Risk>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_market_liquidity: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_holders: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verification: Verification,
    #[serde(default, deserialize_with = "null_as_default")]
    pub top_holders: Vec<TopHolder>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub token: TokenSupply,
    #[serde(default, deserialize_with = "null_as_default")]
    pub markets: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub token_program: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_fee: Option<TransferFee>,
}

impl SolanaTokenReport {
    /// Risks at the given level
    pub fn risks_at(&self, level: RiskLevel) -> impl Iterator<Item = &Risk> {
        self.risks.iter().filter(move |risk| risk.risk_level() == level)
    }
}

/// Basic ERC-20 token facts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvmTokenInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub holder_count: u64,
    #[serde(default)]
    pub total_supply: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DexListing {
    pub liquidity: String,
    pub liquidity_type: String,
    pub name: String,
    pub pair: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvmHolder {
    pub address: String,
    pub balance: String,
    pub is_contract: u8,
    pub is_locked: u8,
    pub percent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Contract security flags; `"1"` means the flag is set, `"0"` that it is not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvmTokenSecurity {
    pub is_open_source: String,
    pub is_proxy: String,
    pub is_mintable: String,
    pub owner_address: String,
    pub can_take_back_ownership: String,
    pub owner_change_balance: String,
    pub hidden_owner: String,
    pub selfdestruct: String,
    pub external_call: String,
    pub buy_tax: String,
    pub sell_tax: String,
    pub cannot_buy: String,
    pub cannot_sell_all: String,
    pub slippage_modifiable: String,
    pub is_honeypot: String,
    pub transfer_pausable: String,
    pub is_blacklisted: String,
    pub is_whitelisted: String,
    pub is_in_dex: String,
    pub anti_whale_modifiable: String,
    pub trading_cooldown: String,
    pub personal_slippage_modifiable: String,
    pub dex: Vec<DexListing>,
    pub holders: Vec<EvmHolder>,
    pub token_name: String,
    pub token_symbol: String,
    pub holder_count: String,
    pub total_supply: String,
}

impl EvmTokenSecurity {
    /// Weighted safety score from 0 (every check failed) to 10 (every check passed)
    pub fn security_score(&self) -> f64 {
        let checks = [
            (self.is_open_source == "1", 2),
            (self.is_proxy == "0", 1),
            (self.owner_address == ZERO_ADDRESS, 2),
            (self.owner_change_balance == "0", 1),
            (self.hidden_owner == "0", 1),
            (self.can_take_back_ownership == "0", 2),
            (self.selfdestruct == "0", 2),
            (self.external_call == "0", 1),
            (self.is_honeypot == "0", 2),
            (self.transfer_pausable == "0", 1),
        ];

        let total: u32 = checks.iter().map(|(_, weight)| weight).sum();
        let earned: u32 = checks
            .iter()
            .filter(|(passed, _)| *passed)
            .map(|(_, weight)| weight)
            .sum();

        f64::from(earned) / f64::from(total) * 10.0
    }
}

/// Combined Ethereum token check
///
/// Either half may be missing if the upstream reported a non-zero result code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvmTokenCheck {
    pub address: String,
    pub info: Option<EvmTokenInfo>,
    pub security: Option<EvmTokenSecurity>,
    pub security_score: Option<f64>,
}

/// `{ "result": 0, "data": ... }` envelope used by TokenPocket
#[derive(Debug, Deserialize)]
struct TokenPocketEnvelope<T> {
    result: i64,
    data: Option<T>,
}

impl<T> TokenPocketEnvelope<T> {
    fn into_data(self) -> Option<T> {
        if self.result == 0 {
            self.data
        } else {
            None
        }
    }
}

/// Client for token safety lookups
#[derive(Debug, Clone)]
pub struct TokenCheckClient<T = ReqwestTransport> {
    fetcher: Fetcher<T>,
    rugcheck_url: String,
    tokenpocket_url: String,
}

impl TokenCheckClient<ReqwestTransport> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_fetcher(Fetcher::with_policy(policy))
    }
}

impl<T: Transport> TokenCheckClient<T> {
    pub fn with_fetcher(fetcher: Fetcher<T>) -> Self {
        Self {
            fetcher,
            rugcheck_url: RUGCHECK_BASE_URL.to_string(),
            tokenpocket_url: TOKENPOCKET_BASE_URL.to_string(),
        }
    }

    /// Overrides both upstream base URLs (for testing)
    pub fn with_urls(mut self, rugcheck_url: impl Into<String>, tokenpocket_url: impl Into<String>) -> Self {
        self.rugcheck_url = rugcheck_url.into();
        self.tokenpocket_url = tokenpocket_url.into();
        self
    }

    /// Fetches the rugcheck report for a Solana mint
    ///
    /// # Returns
    /// * `Err(TokenCheckError::InvalidAddress)` - before any request, if the
    ///   mint is malformed
    /// * `Err(TokenCheckError::InvalidResponse)` - if the report has no token metadata
    pub async fn solana_report(&self, mint: &str) -> Result<SolanaTokenReport, TokenCheckError> {
        if !validate_solana_address(mint) {
            return Err(TokenCheckError::InvalidAddress {
                chain: "Solana",
                address: mint.to_string(),
            });
        }

        let request = HttpRequest::get(format!("{}/tokens/{}/report", self.rugcheck_url, mint));
        let raw: Value = self.fetcher.fetch_json(&request).await?;

        if raw.get("tokenMeta").map_or(true, Value::is_null) {
            return Err(TokenCheckError::InvalidResponse(
                "report has no tokenMeta".to_string(),
            ));
        }

        serde_json::from_value(raw).map_err(|e| TokenCheckError::InvalidResponse(e.to_string()))
    }

    /// Fetches security flags and token info for an Ethereum contract
    ///
    /// Both lookups run concurrently; a transport failure in either fails the
    /// whole check.
    pub async fn evm_security(&self, address: &str) -> Result<EvmTokenCheck, TokenCheckError> {
        if !validate_evm_address(address) {
            return Err(TokenCheckError::InvalidAddress {
                chain: "Ethereum",
                address: address.to_string(),
            });
        }

        let security_request = HttpRequest::get(format!(
            "{}/token/token_security?address={}&ns=ethereum&chain_id={}",
            self.tokenpocket_url, address, ETHEREUM_CHAIN_ID
        ));
        let info_request = HttpRequest::get(format!(
            "{}/token?blockchain_id={}&bl_symbol={}&address={}",
            self.tokenpocket_url, ETHEREUM_CHAIN_ID, address, address
        ));

        let (security, info) = futures::join!(
            self.fetcher
                .fetch_json::<TokenPocketEnvelope<EvmTokenSecurity>>(&security_request),
            self.fetcher
                .fetch_json::<TokenPocketEnvelope<EvmTokenInfo>>(&info_request),
        );

        let security = security?.into_data();
        let info = info?.into_data();
        debug!(
            address,
            has_security = security.is_some(),
            has_info = info.is_some(),
            "token check complete"
        );

        Ok(EvmTokenCheck {
            address: address.to_string(),
            security_score: security.as_ref().map(EvmTokenSecurity::security_score),
            info,
            security,
        })
    }
}
