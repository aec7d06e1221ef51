//! Cache events.

use std::time::Instant;
use xypriss_core::events::ServerEvent;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionCause {
    /// The entry's TTL elapsed.
    Ttl,
    /// The size or entry-count budget forced an LRU eviction.
    Size,
    /// Removed by exact-key invalidation.
    Key,
    /// Removed by pattern invalidation.
    Pattern,
    /// Removed by tag invalidation.
    Tag,
}

impl EvictionCause {
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionCause::Ttl => "ttl",
            EvictionCause::Size => "size",
            EvictionCause::Key => "key",
            EvictionCause::Pattern => "pattern",
            EvictionCause::Tag => "tag",
        }
    }
}

/// Events emitted by the response cache.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// An entry was evicted.
    Evicted {
        cache_name: String,
        timestamp: Instant,
        key: String,
        cause: EvictionCause,
    },
    /// An entry exceeded the per-entry size limit and was not stored.
    EntryRejected {
        cache_name: String,
        timestamp: Instant,
        key: String,
        size: usize,
        max_entry_size: usize,
    },
    /// A singleflight build completed and was stored.
    BuildCompleted {
        cache_name: String,
        timestamp: Instant,
        key: String,
        waiters: usize,
        duration: std::time::Duration,
    },
    /// A singleflight build failed; all waiters observed the failure.
    BuildFailed {
        cache_name: String,
        timestamp: Instant,
        key: String,
    },
    /// A collaborator backend failed; the lookup degraded to a miss.
    BackendDegraded {
        cache_name: String,
        timestamp: Instant,
        reason: String,
    },
}

impl ServerEvent for CacheEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Evicted { .. } => "evicted",
            CacheEvent::EntryRejected { .. } => "entry_rejected",
            CacheEvent::BuildCompleted { .. } => "build_completed",
            CacheEvent::BuildFailed { .. } => "build_failed",
            CacheEvent::BackendDegraded { .. } => "backend_degraded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CacheEvent::Evicted { timestamp, .. }
            | CacheEvent::EntryRejected { timestamp, .. }
            | CacheEvent::BuildCompleted { timestamp, .. }
            | CacheEvent::BuildFailed { timestamp, .. }
            | CacheEvent::BackendDegraded { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            CacheEvent::Evicted { cache_name, .. }
            | CacheEvent::EntryRejected { cache_name, .. }
            | CacheEvent::BuildCompleted { cache_name, .. }
            | CacheEvent::BuildFailed { cache_name, .. }
            | CacheEvent::BackendDegraded { cache_name, .. } => cache_name,
        }
    }
}
