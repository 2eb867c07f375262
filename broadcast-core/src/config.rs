//! Layered configuration for the broadcast engine (§6 of the spec).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Knobs for the [`Router`](broadcast-engine) LRU result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterCacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    /// Minimum `total_users` a routing result must resolve to before it is
    /// worth caching (avoids polluting the LRU with one-off expansions).
    pub cache_threshold: usize,
}

impl Default for RouterCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1_000,
            cache_threshold: 5,
        }
    }
}

/// Knobs for the [`ScalableBroadcaster`](broadcast-engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    pub batch_window: Duration,
    pub max_events_per_user: u32,
    pub max_batch_size: usize,
    pub max_batch_bytes: usize,
    pub batch_worker_count: usize,
    pub delivery_worker_count: usize,
    pub rate_limiter_idle_timeout: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(100),
            max_events_per_user: 100,
            max_batch_size: 50,
            max_batch_bytes: 65_536,
            batch_worker_count: 10,
            delivery_worker_count: 20,
            rate_limiter_idle_timeout: Duration::from_secs(3_600),
        }
    }
}

/// Top-level configuration bundling every knob from §6 of the spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub router_cache: RouterCacheConfig,
    pub broadcaster: BroadcasterConfig,
}

impl BroadcastConfig {
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.broadcaster.batch_window = window;
        self
    }

    pub fn with_max_events_per_user(mut self, max: u32) -> Self {
        self.broadcaster.max_events_per_user = max;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.broadcaster.max_batch_size = max;
        self
    }

    pub fn with_max_batch_bytes(mut self, max: usize) -> Self {
        self.broadcaster.max_batch_bytes = max;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.router_cache.enabled = enabled;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.router_cache.capacity = capacity;
        self
    }

    pub fn with_cache_threshold(mut self, threshold: usize) -> Self {
        self.router_cache.cache_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = BroadcastConfig::default();
        assert_eq!(config.broadcaster.batch_window, Duration::from_millis(100));
        assert_eq!(config.broadcaster.max_events_per_user, 100);
        assert_eq!(config.broadcaster.max_batch_size, 50);
        assert_eq!(config.broadcaster.max_batch_bytes, 65_536);
        assert_eq!(config.router_cache.capacity, 1_000);
        assert_eq!(config.router_cache.cache_threshold, 5);
        assert!(config.router_cache.enabled);
    }

    #[test]
    fn builder_overrides_fields() {
        let config = BroadcastConfig::default()
            .with_batch_window(Duration::from_millis(50))
            .with_max_batch_size(3)
            .with_cache_threshold(1);
        assert_eq!(config.broadcaster.batch_window, Duration::from_millis(50));
        assert_eq!(config.broadcaster.max_batch_size, 3);
        assert_eq!(config.router_cache.cache_threshold, 1);
    }
}
