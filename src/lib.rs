//! w3feed library
//!
//! A cached, rate-limit aware client layer for Web3 data feeds: OKLink chain
//! data, market news and prices, the Fear & Greed index, and token safety
//! checks. The binary is a thin CLI over these modules.

pub mod cache;
pub mod cli;
pub mod data;
pub mod fetch;
