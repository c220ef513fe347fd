use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::resp::Value;

/// The string keyspace: a value store and a parallel expiry store.
///
/// Expiry is checked lazily on every access, and `sweep` removes every
/// expired entry in one pass; the core loop calls it on one database per
/// round. Instants are monotonic, so wall-clock jumps cannot resurrect or
/// prematurely kill entries.
#[derive(Debug, Default)]
pub struct TtlMap {
    data: HashMap<String, Value>,
    expires: HashMap<String, Instant>,
}

impl TtlMap {
    pub fn new() -> Self {
        TtlMap::default()
    }

    /// Stores a value, with an optional time-to-live in milliseconds.
    /// Overwriting always clears a previously set expiry.
    pub fn set(&mut self, key: &str, value: Value, ttl_ms: Option<u64>) {
        self.data.insert(key.to_string(), value);
        match ttl_ms {
            Some(ms) => {
                self.expires
                    .insert(key.to_string(), Instant::now() + Duration::from_millis(ms));
            }
            None => {
                self.expires.remove(key);
            }
        }
    }

    /// Replaces a value in place, keeping any expiry (counter updates).
    pub fn update(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    /// Fetches a value; an expired entry behaves identically to a missing
    /// one and is removed on the spot.
    pub fn get(&mut self, key: &str) -> Option<&Value> {
        if self.evict_if_expired(key) {
            return None;
        }
        self.data.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if self.evict_if_expired(key) {
            return None;
        }
        self.expires.remove(key);
        self.data.remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn evict_if_expired(&mut self, key: &str) -> bool {
        let Some(expires_at) = self.expires.get(key) else {
            return false;
        };
        if *expires_at <= Instant::now() {
            self.expires.remove(key);
            self.data.remove(key);
            return true;
        }
        false
    }

    /// Removes every expired entry, returning how many were evicted.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expires
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.expires.remove(key);
            self.data.remove(key);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get() {
        let mut map = TtlMap::new();
        map.set("foo", Value::bulk("bar"), None);
        assert_eq!(map.get("foo"), Some(&Value::bulk("bar")));
        assert_eq!(map.get("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_lazy() {
        let mut map = TtlMap::new();
        map.set("foo", Value::bulk("bar"), Some(10));

        assert!(map.get("foo").is_some());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(map.get("foo"), None);
        assert_eq!(map.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_entries() {
        let mut map = TtlMap::new();
        map.set("a", Value::bulk("1"), Some(10));
        map.set("b", Value::bulk("2"), Some(10));
        map.set("c", Value::bulk("3"), None);

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(map.sweep(), 2);
        assert_eq!(map.len(), 1);
        assert!(map.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_clears_previous_ttl() {
        let mut map = TtlMap::new();
        map.set("foo", Value::bulk("old"), Some(10));
        map.set("foo", Value::bulk("new"), None);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(map.get("foo"), Some(&Value::bulk("new")));
    }
}
