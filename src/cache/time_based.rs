//! Time-based cache store: entries live until their TTL elapses.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{CacheEntry, CacheStore};

/// TTL-only store with a size cap.
///
/// Expiry is enforced lazily on `get`. When an insert would exceed
/// `max_size`, the oldest entry by insert time is evicted.
pub struct TimeBasedCache {
    max_size: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TimeBasedCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl CacheStore for TimeBasedCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, entry);
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
