//! Shared tables with per-entry time-to-live.
//!
//! The engine keeps four of these: authenticated sessions, blocked IPs,
//! wrong-password counters, and server-message acknowledgements. All four
//! share one construct: a cloneable handle over a locked map whose entries
//! carry an expiry deadline. An entry past its deadline is never observed by
//! any read; physical removal happens lazily on access.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent map with per-entry TTL.
///
/// Cloning produces another handle onto the same table, so the accept loop,
/// per-datagram threads, and broadcast threads all see one set of entries.
pub struct ExpiringTable<K, V> {
    inner: Arc<Mutex<HashMap<K, Entry<V>>>>,
}

impl<K, V> Clone for ExpiringTable<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash, V> ExpiringTable<K, V> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert or replace `key`, expiring `ttl` from now.
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let mut map = self.inner.lock();
        map.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Look up a live entry. An expired entry is removed, never returned.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut map = self.inner.lock();
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    /// True when a live entry exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        let mut map = self.inner.lock();
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => true,
            Some(_) => {
                map.remove(key);
                false
            }
            None => false,
        }
    }

    /// Remove `key`, returning its value if the entry was still live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut map = self.inner.lock();
        let entry = map.remove(key)?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }

    /// Snapshot of the keys of all live entries.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let now = Instant::now();
        let mut map = self.inner.lock();
        map.retain(|_, entry| entry.expires_at > now);
        map.keys().cloned().collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.lock();
        map.retain(|_, entry| entry.expires_at > now);
        map.len()
    }

    /// True when the table holds no live entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Default for ExpiringTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> ExpiringTable<K, u32> {
    /// Add one to the counter at `key` and return the stored count.
    ///
    /// An absent or expired entry is first initialized to zero with deadline
    /// `ttl` from now; incrementing a live entry keeps its original deadline.
    /// The whole step runs under a single lock acquisition, so concurrent
    /// increments for the same key never observe the same count.
    pub fn increment(&self, key: K, ttl: Duration) -> u32 {
        let now = Instant::now();
        let mut map = self.inner.lock();
        let entry = map
            .entry(key)
            .and_modify(|e| {
                if e.expires_at <= now {
                    e.value = 0;
                    e.expires_at = now + ttl;
                }
            })
            .or_insert(Entry {
                value: 0,
                expires_at: now + ttl,
            });
        entry.value += 1;
        entry.value
    }
}
