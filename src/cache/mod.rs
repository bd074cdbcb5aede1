//! Pluggable response cache shared across resource reads.
//!
//! Two strategies share one store interface: time-based (TTL only, size
//! cap with oldest-first eviction) and LRU (recency eviction, TTL still
//! honored). A [`ResponseCache`] wraps the chosen store with the default
//! TTL, per-resource-type overrides and fingerprint computation.

mod lru;
mod time_based;

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

pub use self::lru::LruTtlCache;
pub use self::time_based::TimeBasedCache;

use crate::config::{CacheStrategyKind, GatewayConfig};

/// A stored response with its expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub resource_type: String,
}

impl CacheEntry {
    /// A zero TTL means every read misses.
    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Store interface shared by both strategies. Entries are immutable after
/// insert; updates replace the whole entry.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn set(&self, key: String, entry: CacheEntry);
    fn delete(&self, key: &str) -> bool;
    fn invalidate_by_prefix(&self, prefix: &str) -> usize;
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-read cache directives supplied by a resource's policy.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub private: bool,
    pub must_revalidate: bool,
    pub immutable: bool,
}

/// A cache hit plus the metadata needed for response headers.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub value: Value,
    pub age: Duration,
    pub ttl: Duration,
}

/// Process-wide response cache with a pluggable store.
pub struct ResponseCache {
    store: Box<dyn CacheStore>,
    enabled: bool,
    default_ttl: Duration,
    ttl_overrides: RwLock<HashMap<String, Duration>>,
}

impl ResponseCache {
    pub fn new(store: Box<dyn CacheStore>, enabled: bool, default_ttl: Duration) -> Self {
        Self {
            store,
            enabled,
            default_ttl,
            ttl_overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let store: Box<dyn CacheStore> = match config.cache_strategy {
            CacheStrategyKind::TimeBased => Box::new(TimeBasedCache::new(config.cache_max_size)),
            CacheStrategyKind::Lru => Box::new(LruTtlCache::new(config.cache_max_size)),
        };
        Self::new(store, config.cache_enabled, config.default_cache_ttl())
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Canonical cache key: `{resource_type}:{uri with sorted query}`.
    pub fn fingerprint(resource_type: &str, uri: &str) -> String {
        match uri.split_once('?') {
            Some((base, query)) => {
                let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
                params.sort_unstable();
                format!("{}:{}?{}", resource_type, base, params.join("&"))
            }
            None => format!("{}:{}", resource_type, uri),
        }
    }

    /// Effective TTL for a resource type: explicit override, else default.
    pub fn resource_ttl(&self, resource_type: &str) -> Duration {
        self.ttl_overrides
            .read()
            .get(resource_type)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    pub fn set_resource_ttl(&self, resource_type: &str, ttl: Duration) {
        self.ttl_overrides
            .write()
            .insert(resource_type.to_string(), ttl);
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }
        let entry = self.store.get(key)?;
        debug!("Cache hit for '{}'", key);
        Some(CachedResponse {
            age: entry.inserted_at.elapsed(),
            ttl: entry.ttl,
            value: entry.value,
        })
    }

    /// Insert a response. TTL resolution order: per-read option, per-type
    /// override, default.
    pub fn set(&self, key: &str, value: Value, resource_type: &str, options: &CacheOptions) {
        if !self.enabled {
            return;
        }
        let ttl = options.ttl.unwrap_or_else(|| self.resource_ttl(resource_type));
        self.store.set(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
                resource_type: resource_type.to_string(),
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    /// Drop every entry whose key starts with `{resource_type}:`.
    pub fn invalidate_resource_type(&self, resource_type: &str) -> usize {
        let removed = self
            .store
            .invalidate_by_prefix(&format!("{}:", resource_type));
        if removed > 0 {
            debug!("Invalidated {} '{}' cache entries", removed, resource_type);
        }
        removed
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// Render the `Cache-Control` header value for a cached resource.
pub fn cache_control_value(ttl: Duration, options: &CacheOptions) -> String {
    let mut value = format!("max-age={}", ttl.as_secs());
    if options.private {
        value.push_str(", private");
    }
    if options.must_revalidate {
        value.push_str(", must-revalidate");
    }
    if options.immutable {
        value.push_str(", immutable");
    }
    value
}
