//! Clients for the third-party feeds behind the site's data widgets
//!
//! Each client composes the retrying `Fetcher` with, where the feed is
//! rate limited, the shared `TtlCache`.

pub mod dashboard;
pub mod market;
pub mod oklink;
pub mod token_check;

pub use dashboard::{Dashboard, DashboardSnapshot};
pub use market::{FearGreedResponse, MarketClient, NewsItem, PriceData};
pub use oklink::{ExchangeData, GasFeeData, OklinkClient, OklinkResponse};
pub use token_check::{
    validate_evm_address, validate_solana_address, EvmTokenCheck, SolanaTokenReport, TokenCheckClient,
    TokenCheckError,
};
