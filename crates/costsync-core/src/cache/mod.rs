//! In-process caching layer for costsync-core

pub mod match_cache;

pub use match_cache::{CacheStats, MatchCache};
