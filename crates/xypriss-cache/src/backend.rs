//! The collaborator backend seam.
//!
//! Only the `memory` strategy is implemented in-process. Redis and hybrid
//! deployments plug a [`CacheBackend`] implementation in; the cache treats
//! it as a read-through/write-through layer whose failures degrade to a
//! miss by default.

use crate::config::EntryOptions;
use futures::future::BoxFuture;
use xypriss_core::ServerError;

/// Storage strategy of a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStrategy {
    /// In-process only. Authoritative.
    Memory,
    /// Collaborator backend only; the in-process store acts as a
    /// write-through front.
    Redis,
    /// In-process store backed by a collaborator for misses.
    Hybrid,
}

impl CacheStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStrategy::Memory => "memory",
            CacheStrategy::Redis => "redis",
            CacheStrategy::Hybrid => "hybrid",
        }
    }
}

/// A remote cache store owned by a collaborator.
///
/// Implementations live outside this crate. Errors must be infrastructure
/// errors only; a missing key is `Ok(None)`.
pub trait CacheBackend<V>: Send + Sync {
    /// Loads the artifact stored under `key`, if any.
    fn load(&self, key: &str) -> BoxFuture<'_, Result<Option<V>, ServerError>>;

    /// Stores an artifact.
    fn store<'a>(
        &'a self,
        key: &'a str,
        value: &'a V,
        opts: &'a EntryOptions,
    ) -> BoxFuture<'a, Result<(), ServerError>>;

    /// Removes the artifact stored under `key`.
    fn remove(&self, key: &str) -> BoxFuture<'_, Result<(), ServerError>>;
}
