//! Response caching: an in-process LRU in front of the persistent SQLite store.

pub mod memory_cache;
pub mod response_store;

pub use memory_cache::ResponseMemo;
pub use response_store::{CacheOutcome, CacheSummary, CachedResponse, ResponseStore};
