//! Session-owned TTL cache for expensive status lookups.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Result;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored: Instant,
}

/// String-keyed cache whose entries expire `ttl` after insertion. Owned by
/// the caller and passed by reference; nothing here is process-global.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: HashMap<String, Entry<V>>,
}

/// The cache lifecycle operations use for instance/app/vm status strings.
pub type StatusCache = TtlCache<String>;

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The live value for `key`, if any. Expired entries are dropped.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let fresh = self
            .entries
            .get(key)
            .map(|e| e.stored.elapsed() < self.ttl)?;
        if fresh {
            self.entries.get(key).map(|e| e.value.clone())
        } else {
            self.entries.remove(key);
            None
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                stored: Instant::now(),
            },
        );
    }

    /// Return the cached value or compute, store and return a fresh one.
    /// Failures are not cached.
    pub fn get_or_insert_with<F>(&mut self, key: &str, f: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let value = f()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DrydockError;
    use std::cell::Cell;

    #[test]
    fn computes_once_within_ttl() {
        let mut cache = StatusCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_insert_with("status:api", || {
                    calls.set(calls.get() + 1);
                    Ok("running".to_string())
                })
                .unwrap();
            assert_eq!(v, "running");
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn zero_ttl_never_hits() {
        let mut cache = StatusCache::new(Duration::ZERO);
        cache.insert("k", "v".to_string());
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn errors_are_not_cached() {
        let mut cache = StatusCache::new(Duration::from_secs(60));
        let err = cache.get_or_insert_with("k", || Err(DrydockError::Collaborator("down".into())));
        assert!(err.is_err());
        assert_eq!(cache.len(), 0);
        let v = cache.get_or_insert_with("k", || Ok("up".to_string())).unwrap();
        assert_eq!(v, "up");
    }

    #[test]
    fn invalidate_and_clear() {
        let mut cache = StatusCache::new(Duration::from_secs(60));
        cache.insert("a", "1".to_string());
        cache.insert("b", "2".to_string());
        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
