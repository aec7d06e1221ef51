//! Response caching for XyPriss.
//!
//! A [`ResponseCache`] maps application-opaque string keys to previously
//! computed artifacts, so equivalent requests skip redundant work.
//!
//! # Guarantees
//!
//! - **TTL**: an entry set with ttl `T` at `t0` is returned before `t0 + T`
//!   and is a miss at or after it.
//! - **Singleflight**: for any key, [`ResponseCache::get_or_build`] invokes
//!   the build closure at most once concurrently; every waiting caller
//!   receives the same artifact or the same failure. A build is aborted
//!   only when no waiter remains.
//! - **Eviction**: expired entries go first, then the size and entry-count
//!   budgets are enforced with least-recently-used tie-breaking. Tag
//!   invalidation removes every entry carrying any listed tag; key patterns
//!   use `*` as a single-segment wildcard over `:`-separated keys.
//! - **Degradation**: collaborator backend failures degrade to a miss and
//!   are reported through events, never as request errors, unless the cache
//!   was configured strict.
//!
//! # Example
//!
//! ```rust
//! use xypriss_cache::{CacheConfig, EntryOptions, ResponseCache};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let cache: ResponseCache<String> = ResponseCache::new(CacheConfig::default());
//!
//! let opts = EntryOptions::new()
//!     .ttl(Duration::from_secs(30))
//!     .tag("users");
//! let artifact = cache
//!     .get_or_build("user:42:profile", opts, || async {
//!         Ok("rendered profile".to_string())
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(artifact, "rendered profile");
//!
//! // Tag-based invalidation.
//! let removed = cache.invalidate_tag("users");
//! assert_eq!(removed, 1);
//! # }
//! ```

mod backend;
mod cache;
mod config;
mod error;
mod events;
mod singleflight;
mod store;

pub use backend::{CacheBackend, CacheStrategy};
pub use cache::{CacheStats, ResponseCache};
pub use config::{CacheConfig, CacheConfigBuilder, EntryOptions};
pub use error::CacheError;
pub use events::{CacheEvent, EvictionCause};
