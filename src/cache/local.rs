//! In-process fallback cache.
//!
//! Holds the last known value per key so reads keep working while the remote
//! store is down. Entries expire by TTL only; there is no LRU eviction, the
//! map is simply capped and writes are dropped when it is full.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct LocalCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl LocalCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().expect("local cache lock poisoned");
        match entries.get(key) {
            Some((written_at, value)) if written_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut entries = self.entries.lock().expect("local cache lock poisoned");
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            let ttl = self.ttl;
            entries.retain(|_, (written_at, _)| written_at.elapsed() < ttl);
            if entries.len() >= self.max_entries {
                tracing::debug!(key, "local cache full, dropping write");
                return;
            }
        }
        entries.insert(key.to_string(), (Instant::now(), value));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("local cache lock poisoned")
            .remove(key)
            .is_some()
    }

    /// Removes every key starting with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock().expect("local cache lock poisoned");
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("local cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get() {
        let cache = LocalCache::new(Duration::from_secs(60), 10);
        cache.set("user:1:balance", json!({"amount": "42.00"}));
        assert_eq!(
            cache.get("user:1:balance"),
            Some(json!({"amount": "42.00"}))
        );
        assert_eq!(cache.get("user:2:balance"), None);
    }

    #[test]
    fn test_expired_entry_is_purged() {
        let cache = LocalCache::new(Duration::from_millis(0), 10);
        cache.set("k", json!(1));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_full_cache_drops_new_writes() {
        let cache = LocalCache::new(Duration::from_secs(60), 2);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        cache.set("c", json!(3));
        assert_eq!(cache.get("c"), None);
        assert_eq!(cache.len(), 2);

        // Overwriting an existing key is always allowed.
        cache.set("a", json!(10));
        assert_eq!(cache.get("a"), Some(json!(10)));
    }

    #[test]
    fn test_remove_prefix() {
        let cache = LocalCache::new(Duration::from_secs(60), 10);
        cache.set("user:1:balance", json!(1));
        cache.set("user:1:profile", json!(2));
        cache.set("user:2:balance", json!(3));

        assert_eq!(cache.remove_prefix("user:1:"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("user:2:balance").is_some());
    }
}
