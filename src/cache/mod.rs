//! Cache Module
//!
//! Cache key construction, the cache-store boundary, and the
//! stampede-protected result cache layered on top.

pub mod key;
pub mod result_cache;
pub mod store;

pub use key::{generate_cache_key, CacheKeyParams};
pub use result_cache::{CacheEntry, CacheMetadata, CacheStats, ResultCache, TopQuery};
pub use store::{CacheStore, MemoryCacheStore};
