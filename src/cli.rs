//! Command-line interface parsing for w3feed
//!
//! This module handles parsing of CLI arguments using clap and turns the global
//! flags into the cache and retry settings every client is built with.

use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::data::dashboard::DEFAULT_EXCHANGE;
use crate::data::market::DEFAULT_FEAR_GREED_LIMIT;
use crate::data::oklink::SUPPORTED_EXCHANGES;
use crate::fetch::RetryPolicy;

/// Error types for CLI argument validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    /// Retry delay must be positive
    #[error("Invalid retry delay: must be greater than 0 ms")]
    InvalidRetryDelay,

    /// Cache TTL must be positive
    #[error("Invalid cache TTL: must be greater than 0 seconds")]
    InvalidTtl,

    /// Sweep interval must be positive when given
    #[error("Invalid sweep interval: must be greater than 0 seconds")]
    InvalidSweepInterval,

    /// The command needs an OKLink API key
    #[error("Missing OKLink API key: pass --oklink-key or set OKLINK_API_KEY")]
    MissingApiKey,

    /// The exchange has no published reserves
    #[error("Invalid exchange: '{0}'. Supported exchanges: {list}", list = SUPPORTED_EXCHANGES.join(", "))]
    UnsupportedExchange(String),
}

/// w3feed - Cached, rate-limit aware Web3 market and blockchain data
#[derive(Parser, Debug)]
#[command(name = "w3feed")]
#[command(about = "Web3 market, blockchain, and token safety data from the command line")]
#[command(version)]
pub struct Cli {
    /// How long fetched responses stay fresh, in seconds
    #[arg(long, global = true, default_value_t = 300, value_name = "SECS")]
    pub ttl_secs: u64,

    /// Retries after the first attempt when an API answers 429
    #[arg(long, global = true, default_value_t = 3, value_name = "N")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each retry after
    #[arg(long, global = true, default_value_t = 2000, value_name = "MS")]
    pub retry_delay_ms: u64,

    /// Periodically purge expired cache entries
    #[arg(long, global = true, value_name = "SECS")]
    pub sweep_secs: Option<u64>,

    /// Share one request between concurrent lookups of the same key
    #[arg(long, global = true)]
    pub single_flight: bool,

    /// OKLink API key
    #[arg(long, global = true, env = "OKLINK_API_KEY", hide_env_values = true)]
    pub oklink_key: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Gas fee recommendations for a chain (btc, eth, bsc, ...)
    Gas { chain: String },

    /// Proof-of-reserves for an exchange
    Reserves {
        #[arg(default_value = DEFAULT_EXCHANGE)]
        exchange: String,
    },

    /// Bitcoin network hash rate
    Hashrate,

    /// Bitcoin chain statistics
    ChainInfo,

    /// Recent large transfers on a chain
    LargeTx { chain: String },

    /// Latest crypto news
    News,

    /// Prices for tracked coins
    Prices,

    /// Fear & Greed index history
    FearGreed {
        /// Number of daily readings
        #[arg(long, default_value_t = DEFAULT_FEAR_GREED_LIMIT)]
        limit: u32,
    },

    /// Rugcheck safety report for a Solana token mint
    Rugcheck { mint: String },

    /// Contract security check for an Ethereum token
    EthCheck { address: String },

    /// Every dashboard feed at once; failed feeds come back empty
    Dashboard {
        /// Exchange for the reserves widget
        #[arg(long, default_value = DEFAULT_EXCHANGE)]
        exchange: String,

        /// Reload every 30 seconds until interrupted
        #[arg(long)]
        watch: bool,
    },
}

impl Command {
    /// Whether the command cannot work at all without an OKLink key
    pub fn requires_oklink_key(&self) -> bool {
        matches!(
            self,
            Command::Gas { .. }
                | Command::Reserves { .. }
                | Command::Hashrate
                | Command::ChainInfo
                | Command::LargeTx { .. }
        )
    }

    fn exchange(&self) -> Option<&str> {
        match self {
            Command::Reserves { exchange } | Command::Dashboard { exchange, .. } => Some(exchange),
            _ => None,
        }
    }
}

/// Returns the canonical spelling of a supported exchange, matched case-insensitively
pub fn parse_exchange_arg(s: &str) -> Result<&'static str, CliError> {
    SUPPORTED_EXCHANGES
        .iter()
        .find(|name| name.eq_ignore_ascii_case(s))
        .copied()
        .ok_or_else(|| CliError::UnsupportedExchange(s.to_string()))
}

/// Settings derived from CLI arguments for building clients
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    /// Empty when no key was given
    pub oklink_key: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            oklink_key: String::new(),
        }
    }
}

impl RuntimeConfig {
    /// Creates a RuntimeConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(RuntimeConfig)` with validated settings
    /// * `Err(CliError)` if a value is out of range, the exchange is unknown,
    ///   or the command needs an API key that was not given
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        if cli.ttl_secs == 0 {
            return Err(CliError::InvalidTtl);
        }
        if cli.sweep_secs == Some(0) {
            return Err(CliError::InvalidSweepInterval);
        }
        let retry = RetryPolicy::new(cli.max_retries, Duration::from_millis(cli.retry_delay_ms))
            .map_err(|_| CliError::InvalidRetryDelay)?;

        if let Some(exchange) = cli.command.exchange() {
            parse_exchange_arg(exchange)?;
        }

        let oklink_key = cli
            .oklink_key
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if oklink_key.is_empty() && cli.command.requires_oklink_key() {
            return Err(CliError::MissingApiKey);
        }

        Ok(RuntimeConfig {
            cache: CacheConfig {
                ttl: Duration::from_secs(cli.ttl_secs),
                sweep_interval: cli.sweep_secs.map(Duration::from_secs),
                single_flight: cli.single_flight,
            },
            retry,
            oklink_key,
        })
    }
}
