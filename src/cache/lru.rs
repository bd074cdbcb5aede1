//! LRU cache store with TTL checked on read.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::{CacheEntry, CacheStore};

/// Fixed-capacity LRU store. Recency is tracked on both `get` and `set`;
/// TTL is still honored on `get`.
pub struct LruTtlCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl LruTtlCache {
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl CacheStore for LruTtlCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        let expired = matches!(entries.peek(key), Some(entry) if entry.is_expired());
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).cloned()
    }

    fn set(&self, key: String, entry: CacheEntry) {
        self.entries.lock().push(key, entry);
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            entries.pop(key);
        }
        matching.len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
