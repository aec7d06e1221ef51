//! Cache configuration.

use crate::backend::CacheStrategy;
use crate::events::CacheEvent;
use std::time::Duration;
use xypriss_core::events::{EventListeners, FnListener};

/// Per-entry options passed to `set` and `get_or_build`.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub(crate) ttl: Option<Duration>,
    pub(crate) tags: Vec<String>,
    pub(crate) size_hint: Option<usize>,
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time-to-live for the entry. Without one, the cache default applies.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Attaches an invalidation tag. May be called repeatedly.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Size of the artifact in bytes, for budget accounting. Entries
    /// without a hint count as one byte toward the byte budget and rely on
    /// the entry-count budget instead.
    pub fn size_hint(mut self, bytes: usize) -> Self {
        self.size_hint = Some(bytes);
        self
    }
}

/// Configuration for a [`crate::ResponseCache`].
pub struct CacheConfig {
    pub(crate) name: String,
    pub(crate) strategy: CacheStrategy,
    pub(crate) max_entries: usize,
    pub(crate) max_size_bytes: usize,
    pub(crate) max_entry_size: usize,
    pub(crate) default_ttl: Option<Duration>,
    pub(crate) strict_backend_errors: bool,
    pub(crate) event_listeners: EventListeners<CacheEvent>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder {
    name: String,
    strategy: CacheStrategy,
    max_entries: usize,
    max_size_bytes: usize,
    max_entry_size: usize,
    default_ttl: Option<Duration>,
    strict_backend_errors: bool,
    event_listeners: EventListeners<CacheEvent>,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            strategy: CacheStrategy::Memory,
            max_entries: 10_000,
            max_size_bytes: 64 * 1024 * 1024,
            max_entry_size: 4 * 1024 * 1024,
            default_ttl: Some(Duration::from_secs(300)),
            strict_backend_errors: false,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the cache name for observability.
    ///
    /// Default: `"<unnamed>"`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Selects the storage strategy. Memory is authoritative; redis and
    /// hybrid read through a collaborator backend.
    ///
    /// Default: [`CacheStrategy::Memory`]
    pub fn strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Maximum number of entries before LRU eviction.
    ///
    /// Default: 10 000
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Total byte budget across all entries.
    ///
    /// Default: 64 MiB
    pub fn max_size_bytes(mut self, bytes: usize) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Largest artifact accepted by `set`. Oversized entries are rejected
    /// with an event rather than an error.
    ///
    /// Default: 4 MiB
    pub fn max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }

    /// TTL applied when the entry options carry none. `None` disables the
    /// default (entries without an explicit ttl never expire).
    ///
    /// Default: 300 s
    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Surfaces backend failures as errors instead of degrading to a miss.
    ///
    /// Default: false (degrade to miss)
    pub fn strict_backend_errors(mut self, strict: bool) -> Self {
        self.strict_backend_errors = strict;
        self
    }

    /// Registers a callback for evictions.
    pub fn on_evicted<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, crate::events::EvictionCause) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CacheEvent::Evicted { key, cause, .. } = event {
                f(key, *cause);
            }
        }));
        self
    }

    /// Registers a callback for backend degradation.
    pub fn on_backend_degraded<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let CacheEvent::BackendDegraded { reason, .. } = event {
                f(reason);
            }
        }));
        self
    }

    /// Registers a raw event listener.
    pub fn event_listener<L>(mut self, listener: L) -> Self
    where
        L: xypriss_core::events::EventListener<CacheEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(self) -> CacheConfig {
        CacheConfig {
            name: self.name,
            strategy: self.strategy,
            max_entries: self.max_entries,
            max_size_bytes: self.max_size_bytes,
            max_entry_size: self.max_entry_size,
            default_ttl: self.default_ttl,
            strict_backend_errors: self.strict_backend_errors,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.strategy, CacheStrategy::Memory);
        assert!(!config.strict_backend_errors);
        assert_eq!(config.default_ttl, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_max_entries_floor() {
        let config = CacheConfig::builder().max_entries(0).build();
        assert_eq!(config.max_entries, 1);
    }

    #[test]
    fn test_entry_options() {
        let opts = EntryOptions::new()
            .ttl(Duration::from_secs(5))
            .tag("a")
            .tag("b")
            .size_hint(128);
        assert_eq!(opts.ttl, Some(Duration::from_secs(5)));
        assert_eq!(opts.tags, vec!["a", "b"]);
        assert_eq!(opts.size_hint, Some(128));
    }
}
