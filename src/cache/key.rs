//! Cache Key Generation
//!
//! Deterministic, content-addressed keys for result-cache entries. The
//! tenant id is embedded in both the digest and the key prefix, so two
//! tenants can never collide even on identical question text.

use crate::plan::{FilterSpec, TimeRange};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const KEY_NAMESPACE: &str = "qcache";
pub const LOCK_NAMESPACE: &str = "qlock";
pub const POPULARITY_NAMESPACE: &str = "qpop";

/// Inputs to cache-key generation
#[derive(Debug, Clone)]
pub struct CacheKeyParams<'a> {
    pub question: &'a str,
    pub tenant_id: &'a str,
    pub time_range: Option<&'a TimeRange>,
    pub filters: &'a [FilterSpec],
}

/// Generate the cache key for a logical request.
///
/// Pure function: identical logical inputs (whitespace/case-normalized
/// question, same tenant, same time range, filters in any order)
/// always produce the identical key.
pub fn generate_cache_key(params: &CacheKeyParams) -> String {
    let normalized_question = params.question.trim().to_lowercase();

    // Sort filters by key so insertion order never affects the digest
    let sorted_filters: BTreeMap<&str, (&str, &str)> = params
        .filters
        .iter()
        .map(|f| (f.column.as_str(), (f.operator.as_str(), f.value.as_str())))
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(normalized_question.as_bytes());
    hasher.update(b"|");
    hasher.update(params.tenant_id.as_bytes());
    hasher.update(b"|");
    if let Some(range) = params.time_range {
        hasher.update(range.start.to_rfc3339().as_bytes());
        hasher.update(b"..");
        hasher.update(range.end.to_rfc3339().as_bytes());
    }
    hasher.update(b"|");
    for (column, (operator, value)) in &sorted_filters {
        hasher.update(column.as_bytes());
        hasher.update(operator.as_bytes());
        hasher.update(value.as_bytes());
        hasher.update(b";");
    }

    let digest = hex::encode(hasher.finalize());
    format!("{}:{}:{}", KEY_NAMESPACE, params.tenant_id, digest)
}

/// The short query hash recorded in entry metadata and used for the
/// popularity counters.
pub fn query_hash(key: &str) -> String {
    let digest = key.rsplit(':').next().unwrap_or(key);
    digest[..digest.len().min(16)].to_string()
}

/// Lock key guarding a cache key against concurrent recomputation.
pub fn lock_key(key: &str) -> String {
    format!("{}:{}", LOCK_NAMESPACE, key)
}

/// Popularity counter key for a query hash.
pub fn popularity_key(hash: &str) -> String {
    format!("{}:{}", POPULARITY_NAMESPACE, hash)
}
