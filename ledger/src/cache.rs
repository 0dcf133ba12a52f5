//! Size- and age-bounded caches shared by tree traversal and node services.
//!
//! Losing an entry never loses correctness: every cached value can be
//! re-fetched from the node store or the network.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A cache that can be trimmed by the sweep coordinator.
pub trait Sweepable: Send + Sync {
    fn name(&self) -> &str;

    /// Evict stale and excess entries.
    fn sweep(&self);
}

struct Slot<V> {
    value: V,
    last_access: Instant,
}

/// Key/value cache with last-access tracking.
///
/// `sweep` removes entries not touched within `target_age`, then the least
/// recently used entries until at most `target_size` remain. A target size
/// of zero disables the size bound.
pub struct TaggedCache<K, V> {
    name: String,
    entries: Mutex<HashMap<K, Slot<V>>>,
    target_size: Mutex<usize>,
    target_age: Mutex<Duration>,
}

impl<K, V> TaggedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: impl Into<String>, target_size: usize, target_age: Duration) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
            target_size: Mutex::new(target_size),
            target_age: Mutex::new(target_age),
        }
    }

    /// Look up a value, refreshing its last-access time.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get_mut(key).map(|slot| {
            slot.last_access = Instant::now();
            slot.value.clone()
        })
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            Slot {
                value,
                last_access: now,
            },
        );
    }

    /// Replace the value for `key` with `f(current)`, refreshing its
    /// last-access time. Returns the new value.
    pub fn update<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let value = f(entries.get(&key).map(|slot| &slot.value));
        entries.insert(
            key,
            Slot {
                value: value.clone(),
                last_access: Instant::now(),
            },
        );
        value
    }

    pub fn contains(&self, key: &K) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).map(|slot| slot.value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Snapshot of all cached values, in no particular order.
    pub fn values(&self) -> Vec<V> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().map(|slot| slot.value.clone()).collect()
    }

    pub fn target_size(&self) -> usize {
        *self.target_size.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_target_size(&self, size: usize) {
        *self.target_size.lock().unwrap_or_else(|e| e.into_inner()) = size;
    }

    pub fn target_age(&self) -> Duration {
        *self.target_age.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_target_age(&self, age: Duration) {
        *self.target_age.lock().unwrap_or_else(|e| e.into_inner()) = age;
    }

    /// Evict as of `now`. Returns the number of entries removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let target_size = self.target_size();
        let target_age = self.target_age();

        let (aged_out, mut by_age, excess) = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let before = entries.len();
            entries.retain(|_, slot| now.saturating_duration_since(slot.last_access) < target_age);
            let aged_out = before - entries.len();
            if target_size == 0 || entries.len() <= target_size {
                return aged_out;
            }
            let by_age: Vec<(K, Instant)> = entries
                .iter()
                .map(|(k, slot)| (k.clone(), slot.last_access))
                .collect();
            (aged_out, by_age, entries.len() - target_size)
        };

        by_age.sort_by_key(|(_, at)| *at);
        by_age.truncate(excess);
        aged_out + self.evict_unchanged(by_age)
    }

    /// Remove each key whose last access is still the recorded instant.
    /// Keys touched since the snapshot survive this sweep.
    fn evict_unchanged(&self, oldest: Vec<(K, Instant)>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for (key, at) in oldest {
            if entries.get(&key).is_some_and(|slot| slot.last_access == at) {
                entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }
}

impl<K, V> Sweepable for TaggedCache<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn sweep(&self) {
        let removed = self.sweep_at(Instant::now());
        tracing::trace!(cache = %self.name, removed, remaining = self.len(), "cache swept");
    }
}

/// A set of recently seen keys, bounded like [`TaggedCache`].
pub struct KeyCache<K> {
    inner: TaggedCache<K, ()>,
}

impl<K> KeyCache<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(name: impl Into<String>, target_size: usize, target_age: Duration) -> Self {
        Self {
            inner: TaggedCache::new(name, target_size, target_age),
        }
    }

    pub fn insert(&self, key: K) {
        self.inner.insert(key, ());
    }

    /// Whether `key` is present. Refreshes its last-access time.
    pub fn touch(&self, key: &K) -> bool {
        self.inner.get(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn set_target_size(&self, size: usize) {
        self.inner.set_target_size(size);
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        self.inner.sweep_at(now)
    }
}

impl<K> Sweepable for KeyCache<K>
where
    K: Eq + Hash + Clone + Send,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn sweep(&self) {
        self.inner.sweep();
    }
}
