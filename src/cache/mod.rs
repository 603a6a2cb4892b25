//! In-memory response cache for rate-limited upstream APIs
//!
//! This module provides a TTL cache that de-duplicates outbound API calls within
//! a short freshness window. Entries expire lazily on read; an optional background
//! sweeper bounds memory independently of read traffic, and optional single-flight
//! mode collapses concurrent misses for the same key into one upstream request.

mod manager;
mod sweep;

pub use manager::{cache_key, CacheConfig, TtlCache, DEFAULT_TTL};
pub use sweep::SweepHandle;
