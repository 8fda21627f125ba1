//! Result Cache
//!
//! Content-addressed cache of computed result sets layered over the
//! primitive cache-store operations, with stampede protection,
//! invalidation, and hit-rate instrumentation. Cache and lock failures
//! are soft: a cache error degrades to a miss and a lock error degrades
//! to proceeding without the lock. The tenant-isolation and injection
//! guarantees are evaluated before the cache is ever consulted, so
//! absorbing these failures is safe.

use crate::cache::key::{
    lock_key, popularity_key, query_hash, KEY_NAMESPACE, POPULARITY_NAMESPACE,
};
use crate::cache::store::CacheStore;
use crate::config::SentinelConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Metadata stored alongside every cached payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub ttl_secs: u64,
    pub query_hash: String,
    pub template_id: Option<String>,
}

/// A cached result set with its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    pub metadata: CacheMetadata,
}

/// Cache instrumentation snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: usize,
    pub approx_memory_bytes: u64,
}

/// One row of the "top queries by hit count" report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopQuery {
    pub query_hash: String,
    pub hit_count: i64,
}

/// Result cache over an injected cache-store client
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    lock_ttl: Duration,
    lock_poll_interval: Duration,
    lock_max_polls: u32,
    popularity_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &SentinelConfig) -> Self {
        Self {
            store,
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            lock_poll_interval: Duration::from_millis(config.lock_poll_interval_ms),
            lock_max_polls: config.lock_max_polls,
            popularity_ttl: Duration::from_secs(config.popularity_ttl_secs),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached result. Counts a hit or miss on every call; a
    /// hit refreshes entry metadata and the popularity counter in a
    /// detached task that never blocks or fails the read path.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cache entry, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        self.hits.fetch_add(1, Ordering::Relaxed);
        self.refresh_hit_metadata(entry.clone());
        Some(entry.data)
    }

    /// Store a result set, overwriting any prior entry and resetting
    /// its TTL.
    pub async fn set(
        &self,
        key: &str,
        data: Value,
        ttl: Duration,
        template_id: Option<&str>,
    ) -> Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            data,
            metadata: CacheMetadata {
                created_at: Utc::now(),
                hit_count: 0,
                last_hit_at: None,
                ttl_secs: ttl.as_secs(),
                query_hash: query_hash(key),
                template_id: template_id.map(String::from),
            },
        };
        let raw = serde_json::to_string(&entry)?;
        self.store.set(key, &raw, ttl).await
    }

    /// Bulk removal by key pattern. Returns the number removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.store.scan(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete(&keys).await?;
        debug!(pattern = %pattern, removed, "Invalidated cache entries");
        Ok(removed)
    }

    /// Remove every entry belonging to a tenant.
    pub async fn invalidate_tenant(&self, tenant_id: &str) -> Result<u64> {
        self.invalidate_pattern(&format!("{}:{}:*", KEY_NAMESPACE, tenant_id))
            .await
    }

    /// Remove every entry produced from a template. The template id is
    /// not part of the key, so this inspects stored metadata; expensive
    /// and expected to be infrequent.
    pub async fn invalidate_template(&self, template_id: &str) -> Result<u64> {
        let keys = self.store.scan(&format!("{}:*", KEY_NAMESPACE)).await?;
        let mut to_delete = Vec::new();
        for key in keys {
            if let Ok(Some(raw)) = self.store.get(&key).await {
                if let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) {
                    if entry.metadata.template_id.as_deref() == Some(template_id) {
                        to_delete.push(key);
                    }
                }
            }
        }
        if to_delete.is_empty() {
            return Ok(0);
        }
        self.store.delete(&to_delete).await
    }

    /// Read-through with stampede protection.
    ///
    /// At most one concurrent invocation of `compute` per key under
    /// normal lock behavior. A waiter that exhausts its poll budget
    /// without observing a hit computes WITHOUT the lock and never
    /// releases it; duplicate backend work under sustained contention
    /// is accepted in exchange for availability.
    pub async fn with_stampede_protection<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        template_id: Option<&str>,
        compute: F,
    ) -> Result<(Value, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok((hit, true));
        }

        let lock = lock_key(key);
        let token = Uuid::new_v4().to_string();

        let acquired = match self.store.set_nx(&lock, &token, self.lock_ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(key = %key, error = %e, "Lock acquire failed, proceeding without lock");
                return self.compute_and_store(key, ttl, template_id, compute, None).await;
            }
        };

        if acquired {
            return self
                .compute_and_store(key, ttl, template_id, compute, Some(lock))
                .await;
        }

        // Another task is computing this key. Poll until the lock is
        // observed released or the budget runs out.
        for _ in 0..self.lock_max_polls {
            tokio::time::sleep(self.lock_poll_interval).await;

            if let Some(hit) = self.get(key).await {
                return Ok((hit, true));
            }

            match self.store.get(&lock).await {
                Ok(None) => break,
                Ok(Some(_)) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Lock poll failed, giving up waiting");
                    break;
                }
            }
        }

        if let Some(hit) = self.get(key).await {
            return Ok((hit, true));
        }

        debug!(key = %key, "Lock wait exhausted without a hit, computing without lock");
        self.compute_and_store(key, ttl, template_id, compute, None).await
    }

    async fn compute_and_store<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        template_id: Option<&str>,
        compute: F,
        held_lock: Option<String>,
    ) -> Result<(Value, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let outcome = compute().await;

        match outcome {
            Ok(value) => {
                if let Err(e) = self.set(key, value.clone(), ttl, template_id).await {
                    warn!(key = %key, error = %e, "Cache write failed, returning fresh result");
                }
                self.release(held_lock).await;
                Ok((value, false))
            }
            Err(e) => {
                self.release(held_lock).await;
                Err(e)
            }
        }
    }

    /// Release a held lock unconditionally; failures are logged only.
    async fn release(&self, held_lock: Option<String>) {
        let Some(lock) = held_lock else {
            return;
        };
        if let Err(e) = self.store.delete(&[lock.clone()]).await {
            warn!(lock = %lock, error = %e, "Failed to release stampede lock");
        }
    }

    /// Fire-and-forget metadata refresh on a hit.
    fn refresh_hit_metadata(&self, mut entry: CacheEntry) {
        let store = Arc::clone(&self.store);
        let popularity_ttl = self.popularity_ttl;
        tokio::spawn(async move {
            entry.metadata.hit_count += 1;
            entry.metadata.last_hit_at = Some(Utc::now());

            // Preserve the original expiry rather than extending it
            let elapsed = (Utc::now() - entry.metadata.created_at).num_seconds().max(0) as u64;
            let remaining = entry.metadata.ttl_secs.saturating_sub(elapsed);
            if remaining > 0 {
                match serde_json::to_string(&entry) {
                    Ok(raw) => {
                        if let Err(e) = store
                            .set(&entry.key, &raw, Duration::from_secs(remaining))
                            .await
                        {
                            debug!(key = %entry.key, error = %e, "Hit metadata refresh failed");
                        }
                    }
                    Err(e) => {
                        debug!(key = %entry.key, error = %e, "Hit metadata serialization failed");
                    }
                }
            }

            let pop_key = popularity_key(&entry.metadata.query_hash);
            if let Err(e) = store.incr(&pop_key, popularity_ttl).await {
                debug!(key = %pop_key, error = %e, "Popularity counter update failed");
            }
        });
    }

    /// Hit/miss counters, hit rate, and approximate memory usage.
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };

        let (entry_count, approx_memory_bytes) =
            match self.store.scan(&format!("{}:*", KEY_NAMESPACE)).await {
            Ok(keys) => {
                let mut bytes = 0u64;
                for key in &keys {
                    if let Ok(Some(raw)) = self.store.get(key).await {
                        bytes += raw.len() as u64;
                    }
                }
                (keys.len(), bytes)
            }
            Err(e) => {
                warn!(error = %e, "Cache stats scan failed");
                (0, 0)
            }
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            entry_count,
            approx_memory_bytes,
        }
    }

    /// Top N queries by popularity counter.
    pub async fn top_queries(&self, n: usize) -> Result<Vec<TopQuery>> {
        let keys = self.store.scan(&format!("{}:*", POPULARITY_NAMESPACE)).await?;
        let prefix = format!("{}:", POPULARITY_NAMESPACE);
        let mut top = Vec::new();
        for key in keys {
            if let Ok(Some(raw)) = self.store.get(&key).await {
                if let Ok(count) = raw.parse::<i64>() {
                    let hash = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
                    top.push(TopQuery {
                        query_hash: hash,
                        hit_count: count,
                    });
                }
            }
        }
        top.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
        top.truncate(n);
        Ok(top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{FailingCacheStore, MemoryCacheStore};
    use crate::error::SentinelError;
    use serde_json::json;

    fn cache_with_memory_store() -> (ResultCache, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = ResultCache::new(store.clone(), &SentinelConfig::default());
        (cache, store)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, _) = cache_with_memory_store();
        cache
            .set("qcache:T1:abc", json!([{"a": 1}]), Duration::from_secs(60), None)
            .await
            .unwrap();
        let value = cache.get("qcache:T1:abc").await.unwrap();
        assert_eq!(value, json!([{"a": 1}]));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.entry_count, 1);
        assert!(stats.approx_memory_bytes > 0);
    }

    #[tokio::test]
    async fn test_miss_counts() {
        let (cache, _) = cache_with_memory_store();
        assert!(cache.get("qcache:T1:absent").await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_cache_error_degrades_to_miss() {
        let cache = ResultCache::new(Arc::new(FailingCacheStore), &SentinelConfig::default());
        assert!(cache.get("qcache:T1:any").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_tenant() {
        let (cache, _) = cache_with_memory_store();
        cache
            .set("qcache:T1:a", json!(1), Duration::from_secs(60), None)
            .await
            .unwrap();
        cache
            .set("qcache:T1:b", json!(2), Duration::from_secs(60), None)
            .await
            .unwrap();
        cache
            .set("qcache:T2:c", json!(3), Duration::from_secs(60), None)
            .await
            .unwrap();

        let removed = cache.invalidate_tenant("T1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("qcache:T1:a").await.is_none());
        assert!(cache.get("qcache:T2:c").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_template() {
        let (cache, _) = cache_with_memory_store();
        cache
            .set("qcache:T1:a", json!(1), Duration::from_secs(60), Some("monthly_report"))
            .await
            .unwrap();
        cache
            .set("qcache:T1:b", json!(2), Duration::from_secs(60), Some("daily_digest"))
            .await
            .unwrap();

        let removed = cache.invalidate_template("monthly_report").await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("qcache:T1:a").await.is_none());
        assert!(cache.get("qcache:T1:b").await.is_some());
    }

    #[tokio::test]
    async fn test_stampede_single_compute() {
        let (cache, _) = cache_with_memory_store();
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .with_stampede_protection("qcache:T1:hot", Duration::from_secs(60), None, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(json!({"rows": 3}))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut fresh_count = 0;
        for handle in handles {
            let (value, cached) = handle.await.unwrap();
            assert_eq!(value, json!({"rows": 3}));
            if !cached {
                fresh_count += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fresh_count, 1);
    }

    #[tokio::test]
    async fn test_stampede_releases_lock_on_compute_error() {
        let (cache, store) = cache_with_memory_store();

        let result = cache
            .with_stampede_protection("qcache:T1:bad", Duration::from_secs(60), None, || async {
                Err(SentinelError::Backend {
                    backend: "postgres",
                    code: None,
                    message: "boom".to_string(),
                })
            })
            .await;
        assert!(result.is_err());

        // Lock must be gone so the next caller can proceed immediately
        assert!(store.get("qlock:qcache:T1:bad").await.unwrap().is_none());

        let (value, cached) = cache
            .with_stampede_protection("qcache:T1:bad", Duration::from_secs(60), None, || async {
                Ok(json!(42))
            })
            .await
            .unwrap();
        assert_eq!(value, json!(42));
        assert!(!cached);
    }

    #[tokio::test]
    async fn test_lock_wait_exhaustion_computes_without_lock() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut config = SentinelConfig::default();
        config.lock_max_polls = 3;
        config.lock_poll_interval_ms = 10;
        let cache = ResultCache::new(store.clone(), &config);

        // Lock held by another node that never finishes
        store
            .set_nx("qlock:qcache:T1:stuck", "other-node", Duration::from_secs(300))
            .await
            .unwrap();

        let calls = Arc::new(AtomicU64::new(0));
        let calls_in = calls.clone();
        let (value, cached) = cache
            .with_stampede_protection("qcache:T1:stuck", Duration::from_secs(60), None, || {
                async move {
                    calls_in.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("computed"))
                }
            })
            .await
            .unwrap();

        // Poll budget exhausted: compute runs anyway and the result is fresh
        assert_eq!(value, json!("computed"));
        assert!(!cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The foreign lock is never touched
        assert_eq!(
            store.get("qlock:qcache:T1:stuck").await.unwrap(),
            Some("other-node".to_string())
        );
    }

    #[tokio::test]
    async fn test_lock_error_proceeds_without_lock() {
        let cache = ResultCache::new(Arc::new(FailingCacheStore), &SentinelConfig::default());
        let (value, cached) = cache
            .with_stampede_protection("qcache:T1:k", Duration::from_secs(60), None, || async {
                Ok(json!("fresh"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!("fresh"));
        assert!(!cached);
    }

    #[tokio::test]
    async fn test_hit_refresh_updates_metadata() {
        let (cache, store) = cache_with_memory_store();
        cache
            .set("qcache:T1:a", json!(1), Duration::from_secs(60), None)
            .await
            .unwrap();

        cache.get("qcache:T1:a").await.unwrap();
        // The refresh is detached; give it a moment
        tokio::time::sleep(Duration::from_millis(50)).await;

        let raw = store.get("qcache:T1:a").await.unwrap().unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.metadata.hit_count, 1);
        assert!(entry.metadata.last_hit_at.is_some());
    }

    #[tokio::test]
    async fn test_top_queries() {
        let (cache, _) = cache_with_memory_store();
        cache
            .set("qcache:T1:aaa111", json!(1), Duration::from_secs(60), None)
            .await
            .unwrap();
        cache
            .set("qcache:T1:bbb222", json!(2), Duration::from_secs(60), None)
            .await
            .unwrap();

        for _ in 0..3 {
            cache.get("qcache:T1:aaa111").await.unwrap();
        }
        cache.get("qcache:T1:bbb222").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let top = cache.top_queries(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].query_hash, "aaa111");
        assert_eq!(top[0].hit_count, 3);
    }
}
