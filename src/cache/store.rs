//! Cache Store Abstraction
//!
//! Boundary to the external key-value cache service. The subsystem only
//! relies on these primitive operations; persistence, replication and
//! the memory-pressure eviction policy belong to the service itself.
//! Clients are injected explicitly (no global singletons) and carry an
//! explicit connect/close lifecycle at process boundaries.

use crate::error::{Result, SentinelError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Primitive operations of the backing key-value cache service
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a value, honoring TTL expiry.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value with a TTL, overwriting any prior value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Store only if the key is absent. Returns whether the write won.
    /// This is the atomic primitive behind the stampede lock.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// List keys matching a glob-style pattern (`*` wildcard only).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Increment a counter key, setting `ttl` on first write.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Release any connections. In-memory stores are a no-op.
    async fn close(&self) -> Result<()>;
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// In-memory cache store used in tests and embedded deployments.
///
/// TTLs are enforced lazily on read; memory-pressure eviction is the
/// concern of a real cache service, not this fixture.
pub struct MemoryCacheStore {
    entries: DashMap<String, StoredValue>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.value().expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Only '*' is supported, which is all the protocol layer needs
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        // Entry API keeps check-and-insert atomic per key
        let mut won = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if existing.expired() {
                    existing.value = value.to_string();
                    existing.expires_at = Some(Instant::now() + ttl);
                    won = true;
                }
            })
            .or_insert_with(|| {
                won = true;
                StoredValue {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + ttl),
                }
            });
        Ok(won)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let keys = self
            .entries
            .iter()
            .filter(|e| !e.value().expired() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        Ok(keys)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut counter = 0;
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if existing.expired() {
                    existing.value = "1".to_string();
                    existing.expires_at = Some(Instant::now() + ttl);
                    counter = 1;
                } else {
                    counter = existing.value.parse::<i64>().unwrap_or(0) + 1;
                    existing.value = counter.to_string();
                }
            })
            .or_insert_with(|| {
                counter = 1;
                StoredValue {
                    value: "1".to_string(),
                    expires_at: Some(Instant::now() + ttl),
                }
            });
        Ok(counter)
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing in-memory cache store");
        Ok(())
    }
}

/// A store wrapper that fails every operation. Test fixture for the
/// soft-failure paths (cache errors degrade to miss).
pub struct FailingCacheStore;

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(SentinelError::Cache("store unavailable".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(SentinelError::Cache("store unavailable".to_string()))
    }

    async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
        Err(SentinelError::Cache("store unavailable".to_string()))
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64> {
        Err(SentinelError::Cache("store unavailable".to_string()))
    }

    async fn scan(&self, _pattern: &str) -> Result<Vec<String>> {
        Err(SentinelError::Cache("store unavailable".to_string()))
    }

    async fn incr(&self, _key: &str, _ttl: Duration) -> Result<i64> {
        Err(SentinelError::Cache("store unavailable".to_string()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
