//! Firewall Configuration
//!
//! All tunables live here, loadable from environment variables with
//! sensible defaults for local development.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the query firewall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Maximum LIMIT a query may declare
    pub max_limit_rows: u64,

    /// Maximum explicit date window in a query text (days)
    pub max_time_window_days: i64,

    /// Absolute ceiling on a plan's time range (days)
    pub max_plan_range_days: i64,

    /// Maximum nested-subquery depth
    pub max_subquery_depth: u32,

    /// Default TTL for cached result sets (seconds)
    pub cache_ttl_secs: u64,

    /// TTL for stampede locks (seconds)
    pub lock_ttl_secs: u64,

    /// Fixed interval between lock polls (milliseconds)
    pub lock_poll_interval_ms: u64,

    /// Maximum number of lock polls before giving up and computing anyway
    pub lock_max_polls: u32,

    /// Hard wall-clock timeout for backend execution (milliseconds)
    pub default_timeout_ms: u64,

    /// Row cap applied after execution
    pub default_max_rows: usize,

    /// TTL for the per-query popularity counters (seconds)
    pub popularity_ttl_secs: u64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            max_limit_rows: 10_000,
            max_time_window_days: 730,
            max_plan_range_days: 1825,
            max_subquery_depth: 3,
            cache_ttl_secs: 3600,
            lock_ttl_secs: 30,
            lock_poll_interval_ms: 100,
            lock_max_polls: 50,
            default_timeout_ms: 30_000,
            default_max_rows: 10_000,
            popularity_ttl_secs: 86_400,
        }
    }
}

impl SentinelConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        Self {
            max_limit_rows: env_or("SENTINEL_MAX_LIMIT_ROWS", defaults.max_limit_rows),
            max_time_window_days: env_or("SENTINEL_MAX_TIME_WINDOW_DAYS", defaults.max_time_window_days),
            max_plan_range_days: env_or("SENTINEL_MAX_PLAN_RANGE_DAYS", defaults.max_plan_range_days),
            max_subquery_depth: env_or("SENTINEL_MAX_SUBQUERY_DEPTH", defaults.max_subquery_depth),
            cache_ttl_secs: env_or("SENTINEL_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            lock_ttl_secs: env_or("SENTINEL_LOCK_TTL_SECS", defaults.lock_ttl_secs),
            lock_poll_interval_ms: env_or("SENTINEL_LOCK_POLL_INTERVAL_MS", defaults.lock_poll_interval_ms),
            lock_max_polls: env_or("SENTINEL_LOCK_MAX_POLLS", defaults.lock_max_polls),
            default_timeout_ms: env_or("SENTINEL_TIMEOUT_MS", defaults.default_timeout_ms),
            default_max_rows: env_or("SENTINEL_MAX_ROWS", defaults.default_max_rows),
            popularity_ttl_secs: env_or("SENTINEL_POPULARITY_TTL_SECS", defaults.popularity_ttl_secs),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SentinelConfig::default();
        assert_eq!(config.max_limit_rows, 10_000);
        assert_eq!(config.max_time_window_days, 730);
        assert_eq!(config.lock_ttl_secs, 30);
    }
}
