//! The response cache proper.

use crate::backend::{CacheBackend, CacheStrategy};
use crate::config::{CacheConfig, EntryOptions};
use crate::error::CacheError;
use crate::events::{CacheEvent, EvictionCause};
use crate::singleflight::{InFlight, Join, LeaderToken};
use crate::store::MemoryStore;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use xypriss_core::{ErrorKind, ServerError};

const CAUSES: [EvictionCause; 5] = [
    EvictionCause::Ttl,
    EvictionCause::Size,
    EvictionCause::Key,
    EvictionCause::Pattern,
    EvictionCause::Tag,
];

fn cause_index(cause: EvictionCause) -> usize {
    match cause {
        EvictionCause::Ttl => 0,
        EvictionCause::Size => 1,
        EvictionCause::Key => 2,
        EvictionCause::Pattern => 3,
        EvictionCause::Tag => 4,
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub strategy: &'static str,
    pub entries: usize,
    pub size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits over total lookups; 0.0 with no traffic.
    pub hit_rate: f64,
    /// Evictions as (cause, count) pairs.
    pub evictions: Vec<(&'static str, u64)>,
    pub builds: u64,
    pub build_failures: u64,
    /// Keys with a build currently in flight.
    pub in_flight: usize,
}

struct CacheInner<V: Clone + Send + Sync + 'static> {
    config: CacheConfig,
    store: Mutex<MemoryStore<V>>,
    inflight: InFlight<V>,
    backend: Option<Arc<dyn CacheBackend<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: [AtomicU64; 5],
    builds: AtomicU64,
    build_failures: AtomicU64,
}

/// Key→artifact cache with TTL, tags, LRU eviction, and singleflight
/// builds. Cloning shares the underlying cache.
pub struct ResponseCache<V: Clone + Send + Sync + 'static> {
    inner: Arc<CacheInner<V>>,
}

impl<V: Clone + Send + Sync + 'static> Clone for ResponseCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Attaches a collaborator backend for the redis/hybrid strategies.
    pub fn with_backend(config: CacheConfig, backend: Arc<dyn CacheBackend<V>>) -> Self {
        Self::build(config, Some(backend))
    }

    fn build(config: CacheConfig, backend: Option<Arc<dyn CacheBackend<V>>>) -> Self {
        let store = MemoryStore::new(config.max_entries, config.max_size_bytes);
        Self {
            inner: Arc::new(CacheInner {
                config,
                store: Mutex::new(store),
                inflight: InFlight::new(),
                backend,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: Default::default(),
                builds: AtomicU64::new(0),
                build_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Looks up `key` in the in-process store.
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.inner.store.lock().get(key, Instant::now());
        self.record_lookup(value.is_some());
        value
    }

    /// Looks up `key`, consulting the collaborator backend on a miss when
    /// the strategy reads through. Backend failures degrade to a miss
    /// unless the cache is strict.
    pub async fn fetch(&self, key: &str) -> Result<Option<V>, CacheError> {
        if let Some(value) = self.inner.store.lock().get(key, Instant::now()) {
            self.record_lookup(true);
            return Ok(Some(value));
        }

        if self.reads_through() {
            if let Some(backend) = &self.inner.backend {
                match backend.load(key).await {
                    Ok(Some(value)) => {
                        self.record_lookup(true);
                        return Ok(Some(value));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        if self.inner.config.strict_backend_errors {
                            return Err(CacheError::BackendUnavailable(err.to_string()));
                        }
                        self.degrade(err);
                    }
                }
            }
        }

        self.record_lookup(false);
        Ok(None)
    }

    /// Stores an artifact. Oversized artifacts are dropped with an event.
    pub fn set(&self, key: &str, value: V, opts: EntryOptions) {
        let size = opts.size_hint.unwrap_or(1);
        if size > self.inner.config.max_entry_size {
            self.inner.config.event_listeners.emit(&CacheEvent::EntryRejected {
                cache_name: self.inner.config.name.clone(),
                timestamp: std::time::Instant::now(),
                key: key.to_string(),
                size,
                max_entry_size: self.inner.config.max_entry_size,
            });
            return;
        }

        let ttl = opts.ttl.or(self.inner.config.default_ttl);
        let evicted = self.inner.store.lock().insert(
            key.to_string(),
            value.clone(),
            ttl,
            opts.tags.clone(),
            size,
            Instant::now(),
        );
        for (evicted_key, cause) in evicted {
            self.record_eviction(&evicted_key, cause);
        }

        if self.writes_through() {
            if let Some(backend) = &self.inner.backend {
                let backend = Arc::clone(backend);
                let cache = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    if let Err(err) = backend.store(&key, &value, &opts).await {
                        cache.degrade(err);
                    }
                });
            }
        }
    }

    /// Returns the artifact for `key`, building it at most once across
    /// concurrent callers.
    ///
    /// Waiters all receive the built artifact, or all receive the build's
    /// failure as [`CacheError::BuildFailed`]. If every caller goes away
    /// before the build finishes, the build is aborted.
    pub async fn get_or_build<F, Fut>(
        &self,
        key: &str,
        opts: EntryOptions,
        build: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ServerError>> + Send + 'static,
    {
        if let Some(value) = self.fetch(key).await? {
            return Ok(value);
        }

        match self.inner.inflight.join(key) {
            Join::Waiter(waiter) => waiter.wait().await,
            Join::Leader(waiter, token) => {
                // A racing flight may have filled the store between the miss
                // and the join.
                if let Some(value) = self.inner.store.lock().get(key, Instant::now()) {
                    self.inner.inflight.complete(&token, Ok(value.clone()));
                    return Ok(value);
                }
                let flight_key = token.key.clone();
                let flight_id = token.flight_id;
                let future = build();
                let cache = self.clone();
                let handle = tokio::spawn(async move {
                    cache.run_build(token, opts, future).await;
                });
                self.inner
                    .inflight
                    .set_abort(&flight_key, flight_id, handle.abort_handle());
                waiter.wait().await
            }
        }
    }

    async fn run_build<Fut>(&self, token: LeaderToken, opts: EntryOptions, future: Fut)
    where
        Fut: Future<Output = Result<V, ServerError>> + Send,
    {
        let started = Instant::now();
        let outcome = std::panic::AssertUnwindSafe(future).catch_unwind().await;

        let result = match outcome {
            Ok(Ok(value)) => {
                self.inner.builds.fetch_add(1, Ordering::Relaxed);
                self.set(&token.key, value.clone(), opts);
                Ok(value)
            }
            Ok(Err(err)) => Err(CacheError::BuildFailed(Arc::new(err))),
            Err(_panic) => Err(CacheError::BuildFailed(Arc::new(ServerError::new(
                ErrorKind::CacheBuildFailed,
                "build panicked",
            )))),
        };

        let failed = result.is_err();
        let waiters = self.inner.inflight.complete(&token, result);

        if failed {
            self.inner.build_failures.fetch_add(1, Ordering::Relaxed);
            self.inner.config.event_listeners.emit(&CacheEvent::BuildFailed {
                cache_name: self.inner.config.name.clone(),
                timestamp: std::time::Instant::now(),
                key: token.key.clone(),
            });
        } else {
            self.inner
                .config
                .event_listeners
                .emit(&CacheEvent::BuildCompleted {
                    cache_name: self.inner.config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    key: token.key.clone(),
                    waiters,
                    duration: started.elapsed(),
                });
        }
    }

    /// Removes the exact key. Returns the number of entries removed (0/1).
    pub fn invalidate_key(&self, key: &str) -> usize {
        let removed = self.inner.store.lock().remove(key);
        if removed {
            self.record_eviction(key, EvictionCause::Key);
            self.backend_remove(key);
            1
        } else {
            0
        }
    }

    /// Removes every key matching a `*`-wildcard pattern over
    /// `:`-separated segments. Returns the count removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let keys = {
            let mut store = self.inner.store.lock();
            let keys = store.keys_matching(pattern);
            for key in &keys {
                store.remove(key);
            }
            keys
        };
        for key in &keys {
            self.record_eviction(key, EvictionCause::Pattern);
            self.backend_remove(key);
        }
        keys.len()
    }

    /// Removes every entry carrying `tag`. Returns the count removed.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let keys = {
            let mut store = self.inner.store.lock();
            let keys = store.keys_with_tag(tag);
            for key in &keys {
                store.remove(key);
            }
            keys
        };
        for key in &keys {
            self.record_eviction(key, EvictionCause::Tag);
            self.backend_remove(key);
        }
        keys.len()
    }

    /// Eagerly drops expired entries. Returns the count dropped. The server
    /// calls this periodically; lookups also expire lazily.
    pub fn sweep(&self) -> usize {
        let keys = self.inner.store.lock().sweep_expired(Instant::now());
        for key in &keys {
            self.record_eviction(key, EvictionCause::Ttl);
        }
        keys.len()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.store.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, size_bytes) = {
            let store = self.inner.store.lock();
            (store.len(), store.total_bytes())
        };
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            strategy: self.inner.config.strategy.as_str(),
            entries,
            size_bytes,
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            evictions: CAUSES
                .iter()
                .map(|&c| {
                    (
                        c.as_str(),
                        self.inner.evictions[cause_index(c)].load(Ordering::Relaxed),
                    )
                })
                .collect(),
            builds: self.inner.builds.load(Ordering::Relaxed),
            build_failures: self.inner.build_failures.load(Ordering::Relaxed),
            in_flight: self.inner.inflight.len(),
        }
    }

    fn reads_through(&self) -> bool {
        matches!(
            self.inner.config.strategy,
            CacheStrategy::Redis | CacheStrategy::Hybrid
        )
    }

    fn writes_through(&self) -> bool {
        self.reads_through() && self.inner.backend.is_some()
    }

    fn backend_remove(&self, key: &str) {
        if self.writes_through() {
            if let Some(backend) = &self.inner.backend {
                let backend = Arc::clone(backend);
                let cache = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    if let Err(err) = backend.remove(&key).await {
                        cache.degrade(err);
                    }
                });
            }
        }
    }

    fn degrade(&self, err: ServerError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(cache = %self.inner.config.name, "cache backend degraded to miss: {err}");
        self.inner
            .config
            .event_listeners
            .emit(&CacheEvent::BackendDegraded {
                cache_name: self.inner.config.name.clone(),
                timestamp: std::time::Instant::now(),
                reason: err.to_string(),
            });
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
        }
        #[cfg(feature = "metrics")]
        {
            let outcome = if hit { "hit" } else { "miss" };
            metrics::counter!(
                "xypriss_cache_lookups_total",
                "cache" => self.inner.config.name.clone(),
                "outcome" => outcome
            )
            .increment(1);
        }
    }

    fn record_eviction(&self, key: &str, cause: EvictionCause) {
        self.inner.evictions[cause_index(cause)].fetch_add(1, Ordering::Relaxed);
        self.inner.config.event_listeners.emit(&CacheEvent::Evicted {
            cache_name: self.inner.config.name.clone(),
            timestamp: std::time::Instant::now(),
            key: key.to_string(),
            cause,
        });
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "xypriss_cache_evictions_total",
            "cache" => self.inner.config.name.clone(),
            "cause" => cause.as_str()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cache() -> ResponseCache<String> {
        ResponseCache::new(CacheConfig::builder().name("test").build())
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache();
        cache.set("k", "v".into(), EntryOptions::new());
        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(cache.get("other"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_get_or_build_runs_once_and_caches() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .get_or_build("k", EntryOptions::new(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("built".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "built");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().builds, 1);
    }

    #[tokio::test]
    async fn test_build_failure_surfaces() {
        let cache = cache();
        let result = cache
            .get_or_build("k", EntryOptions::new(), || async {
                Err(ServerError::new(ErrorKind::UpstreamUnavailable, "db down"))
            })
            .await;
        assert!(matches!(result, Err(CacheError::BuildFailed(_))));
        assert_eq!(cache.stats().build_failures, 1);
        // The failure is not cached.
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn test_build_panic_is_contained() {
        let cache = cache();
        let result = cache
            .get_or_build("k", EntryOptions::new(), || async {
                panic!("handler bug");
                #[allow(unreachable_code)]
                Ok(String::new())
            })
            .await;
        assert!(matches!(result, Err(CacheError::BuildFailed(_))));
    }

    #[tokio::test]
    async fn test_invalidate_counts() {
        let cache = cache();
        let tagged = EntryOptions::new().tag("users");
        cache.set("user:1:profile", "a".into(), tagged.clone());
        cache.set("user:2:profile", "b".into(), tagged.clone());
        cache.set("order:1", "c".into(), EntryOptions::new().tag("orders"));

        assert_eq!(cache.invalidate_pattern("user:*:profile"), 2);
        assert_eq!(cache.invalidate_tag("orders"), 1);
        assert_eq!(cache.invalidate_key("missing"), 0);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies() {
        let cache: ResponseCache<String> = ResponseCache::new(
            CacheConfig::builder()
                .default_ttl(Some(Duration::from_secs(1)))
                .build(),
        );
        cache.set("k", "v".into(), EntryOptions::new());
        assert_eq!(cache.get("k"), Some("v".to_string()));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let cache: ResponseCache<String> =
            ResponseCache::new(CacheConfig::builder().max_entry_size(8).build());
        cache.set("k", "v".into(), EntryOptions::new().size_hint(9));
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn test_sweep_reports_count() {
        let cache: ResponseCache<String> = ResponseCache::new(
            CacheConfig::builder().default_ttl(None).build(),
        );
        cache.set("a", "1".into(), EntryOptions::new().ttl(Duration::from_nanos(1)));
        cache.set("b", "2".into(), EntryOptions::new());
        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().entries, 1);
    }
}
