//! In-process cache storage.

use crate::events::EvictionCause;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

/// Entry in the cache with TTL and tag tracking.
#[derive(Clone, Debug)]
struct StoredEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Option<Duration>,
    tags: Vec<String>,
    size: usize,
}

impl<V> StoredEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.inserted_at) >= ttl,
            None => false,
        }
    }
}

/// Recency-ordered store enforcing the entry-count and byte budgets.
///
/// Expired entries are dropped lazily on read and eagerly by
/// [`MemoryStore::sweep_expired`]; budget pressure always clears expired
/// entries before touching live ones.
pub(crate) struct MemoryStore<V> {
    entries: LruCache<String, StoredEntry<V>>,
    total_bytes: usize,
    max_bytes: usize,
}

impl<V: Clone> MemoryStore<V> {
    pub(crate) fn new(max_entries: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: LruCache::new(capacity),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Gets an unexpired value, refreshing its recency.
    pub(crate) fn get(&mut self, key: &str, now: Instant) -> Option<V> {
        let expired = self.entries.get(key).map(|e| e.is_expired(now))?;
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Inserts a value, evicting as needed. Returns the keys evicted to
    /// make room (budget evictions only, not the replaced key itself).
    pub(crate) fn insert(
        &mut self,
        key: String,
        value: V,
        ttl: Option<Duration>,
        tags: Vec<String>,
        size: usize,
        now: Instant,
    ) -> Vec<(String, EvictionCause)> {
        let mut evicted = Vec::new();

        // Replacing an entry returns its bytes to the budget first.
        if let Some(old) = self.entries.pop(&key) {
            self.total_bytes -= old.size;
        }

        let entry = StoredEntry {
            value,
            inserted_at: now,
            ttl,
            tags,
            size,
        };
        self.total_bytes += size;
        if let Some((lru_key, lru_entry)) = self.entries.push(key, entry) {
            // Count-budget eviction from the LruCache itself.
            self.total_bytes -= lru_entry.size;
            evicted.push((lru_key, EvictionCause::Size));
        }

        if self.total_bytes > self.max_bytes {
            evicted.extend(
                self.sweep_expired(now)
                    .into_iter()
                    .map(|k| (k, EvictionCause::Ttl)),
            );
        }
        while self.total_bytes > self.max_bytes && self.entries.len() > 1 {
            if let Some((lru_key, lru_entry)) = self.entries.pop_lru() {
                self.total_bytes -= lru_entry.size;
                evicted.push((lru_key, EvictionCause::Size));
            } else {
                break;
            }
        }
        evicted
    }

    /// Removes a specific key.
    pub(crate) fn remove(&mut self, key: &str) -> bool {
        if let Some(entry) = self.entries.pop(key) {
            self.total_bytes -= entry.size;
            true
        } else {
            false
        }
    }

    /// Drops every expired entry, returning their keys.
    pub(crate) fn sweep_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired
    }

    /// Keys of entries carrying `tag`.
    pub(crate) fn keys_with_tag(&self, tag: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.tags.iter().any(|t| t == tag))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys matching a `*`-wildcard pattern over `:`-separated segments.
    pub(crate) fn keys_matching(&self, pattern: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(k, _)| key_pattern_matches(pattern, k))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }
}

/// Matches cache-key patterns: segments split on `:`, `*` matches exactly
/// one segment, everything else compares exactly.
pub(crate) fn key_pattern_matches(pattern: &str, key: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split(':').collect();
    let key_segments: Vec<&str> = key.split(':').collect();
    if pattern_segments.len() != key_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(&key_segments)
        .all(|(p, k)| *p == "*" || p == k)
}
