//! Cache configuration.
//!
//! Controls marker retention, detail expiry, index bounds, and store timeouts
//! via `corkboard.toml`.

use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MARKER_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_DETAIL_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_RECENT_LIST_LIMIT: usize = 1000;
const DEFAULT_CATEGORY_LIST_LIMIT: usize = 1000;
const DEFAULT_COMMENT_LIST_LIMIT: usize = 100;
const DEFAULT_RANKING_LIST_LIMIT: usize = 100;
const DEFAULT_STORE_OP_TIMEOUT_MS: u64 = 250;

/// Cache configuration from `corkboard.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Retention of idempotency markers, in seconds.
    pub marker_ttl_secs: u64,
    /// Expiry of detail snapshots, in seconds. Zero disables expiry.
    pub detail_ttl_secs: u64,
    /// Maximum members of the global recency index.
    pub recent_list_limit: usize,
    /// Maximum members of each per-category recency index.
    pub category_list_limit: usize,
    /// Maximum members of each per-board comment index.
    pub comment_list_limit: usize,
    /// Maximum members kept from a ranking snapshot.
    pub ranking_list_limit: usize,
    /// Upper bound for a single store round trip, in milliseconds.
    pub store_op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            marker_ttl_secs: DEFAULT_MARKER_TTL_SECS,
            detail_ttl_secs: DEFAULT_DETAIL_TTL_SECS,
            recent_list_limit: DEFAULT_RECENT_LIST_LIMIT,
            category_list_limit: DEFAULT_CATEGORY_LIST_LIMIT,
            comment_list_limit: DEFAULT_COMMENT_LIST_LIMIT,
            ranking_list_limit: DEFAULT_RANKING_LIST_LIMIT,
            store_op_timeout_ms: DEFAULT_STORE_OP_TIMEOUT_MS,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            marker_ttl_secs: settings.cache.marker_ttl.as_secs(),
            detail_ttl_secs: settings
                .cache
                .detail_ttl
                .map(|ttl| ttl.as_secs())
                .unwrap_or(0),
            recent_list_limit: settings.cache.recent_list_limit.get(),
            category_list_limit: settings.cache.category_list_limit.get(),
            comment_list_limit: settings.cache.comment_list_limit.get(),
            ranking_list_limit: settings.cache.ranking_list_limit.get(),
            store_op_timeout_ms: settings.store.op_timeout.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    /// Marker retention, clamped to at least one second.
    pub fn marker_ttl(&self) -> Duration {
        Duration::from_secs(self.marker_ttl_secs.max(1))
    }

    /// Detail expiry, or `None` when snapshots never expire.
    pub fn detail_ttl(&self) -> Option<Duration> {
        (self.detail_ttl_secs > 0).then(|| Duration::from_secs(self.detail_ttl_secs))
    }

    /// Store round-trip bound, clamped to at least one millisecond.
    pub fn store_op_timeout(&self) -> Duration {
        Duration::from_millis(self.store_op_timeout_ms.max(1))
    }

    /// Comment index bound, clamped to at least one member.
    pub fn comment_list_limit(&self) -> usize {
        self.comment_list_limit.max(1)
    }

    pub fn recent_list_limit(&self) -> usize {
        self.recent_list_limit.max(1)
    }

    pub fn category_list_limit(&self) -> usize {
        self.category_list_limit.max(1)
    }

    pub fn ranking_list_limit(&self) -> usize {
        self.ranking_list_limit.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.marker_ttl_secs, 86_400);
        assert_eq!(config.detail_ttl_secs, 86_400);
        assert_eq!(config.recent_list_limit, 1000);
        assert_eq!(config.category_list_limit, 1000);
        assert_eq!(config.comment_list_limit, 100);
        assert_eq!(config.ranking_list_limit, 100);
        assert_eq!(config.store_op_timeout_ms, 250);
    }

    #[test]
    fn zero_detail_ttl_disables_expiry() {
        let config = CacheConfig {
            detail_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.detail_ttl().is_none());
    }

    #[test]
    fn limits_clamp_to_one() {
        let config = CacheConfig {
            comment_list_limit: 0,
            marker_ttl_secs: 0,
            store_op_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.comment_list_limit(), 1);
        assert_eq!(config.marker_ttl(), Duration::from_secs(1));
        assert_eq!(config.store_op_timeout(), Duration::from_millis(1));
    }
}
