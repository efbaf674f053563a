// SPDX-License-Identifier: Apache-2.0

//! Shared keyed stores.
//!
//! [`KeyedStore`] is a cloneable handle over a mutex-protected map keyed by
//! path-like strings. [`ExpiringStore`] adds a per-entry deadline that is
//! evicted by [`ExpiringStore::expire_sweep`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

pub struct KeyedStore<V> {
    inner: Arc<Mutex<HashMap<String, V>>>,
}

impl<V> Clone for KeyedStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for KeyedStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> KeyedStore<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // A poisoned lock only means another holder panicked mid-update; the map
    // itself is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.lock().insert(key.into(), value);
    }

    pub fn get_and_remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key)
    }

    pub fn remove_all<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let mut map = self.lock();
        for key in keys {
            map.remove(key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Visit every entry while holding the lock. The callback must not call
    /// back into this store.
    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        let map = self.lock();
        for (k, v) in map.iter() {
            f(k, v);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<V: Clone> KeyedStore<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<(String, V)> {
        self.lock().drain().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.lock().values().cloned().collect()
    }
}

#[derive(Clone, Debug)]
struct Expiring<V> {
    value: V,
    expires_at: Option<Instant>,
}

/// A keyed store whose entries may carry an expiry deadline.
pub struct ExpiringStore<V> {
    entries: KeyedStore<Expiring<V>>,
}

impl<V> Clone for ExpiringStore<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<V> Default for ExpiringStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ExpiringStore<V> {
    pub fn new() -> Self {
        Self {
            entries: KeyedStore::new(),
        }
    }

    /// Insert without a deadline. The entry survives every sweep.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.set(
            key,
            Expiring {
                value,
                expires_at: None,
            },
        );
    }

    pub fn set_with_expiry(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.set_with_deadline(key, value, Instant::now() + ttl);
    }

    pub(crate) fn set_with_deadline(&self, key: impl Into<String>, value: V, deadline: Instant) {
        self.entries.set(
            key,
            Expiring {
                value,
                expires_at: Some(deadline),
            },
        );
    }

    pub fn get_and_remove(&self, key: &str) -> Option<V> {
        self.entries.get_and_remove(key).map(|e| e.value)
    }

    pub fn remove_all<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        self.entries.remove_all(keys)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every entry whose deadline has passed, returning how many were removed.
    pub fn expire_sweep(&self) -> usize {
        self.expire_sweep_at(Instant::now())
    }

    pub(crate) fn expire_sweep_at(&self, now: Instant) -> usize {
        let mut map = self.entries.lock();
        let before = map.len();
        map.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, remaining = map.len(), "Expired keyed store entries.");
        }
        removed
    }
}

impl<V: Clone> ExpiringStore<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|e| e.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_remove_is_single_shot() {
        let store = KeyedStore::new();
        store.set("/var/log/a.log", 10u64);

        assert_eq!(Some(10), store.get("/var/log/a.log"));
        assert_eq!(Some(10), store.get_and_remove("/var/log/a.log"));
        assert_eq!(None, store.get_and_remove("/var/log/a.log"));
        assert!(store.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let store = KeyedStore::new();
        let other = store.clone();
        other.set("a", "x".to_string());
        other.set("b", "y".to_string());
        other.set("c", "z".to_string());

        store.remove_all(["a", "c"]);

        let mut seen = Vec::new();
        other.for_each(|k, v| seen.push(format!("{k}={v}")));
        assert_eq!(vec!["b=y".to_string()], seen);
    }

    #[test]
    fn sweep_respects_deadlines() {
        let store = ExpiringStore::new();
        let now = Instant::now();
        store.set_with_deadline("old", 1u64, now + Duration::from_secs(10));
        store.set_with_deadline("new", 2u64, now + Duration::from_secs(3600));
        store.set("pinned", 3u64);

        assert_eq!(0, store.expire_sweep_at(now));
        assert_eq!(1, store.expire_sweep_at(now + Duration::from_secs(60)));

        assert_eq!(None, store.get("old"));
        assert_eq!(Some(2), store.get("new"));

        assert_eq!(1, store.expire_sweep_at(now + Duration::from_secs(7200)));
        assert_eq!(Some(3), store.get("pinned"));
    }
}
