//! XyPriss: a high-throughput HTTP application server.
//!
//! This meta-crate re-exports the component crates behind feature flags.
//! Most applications want the default `server` feature and start from
//! [`server::ServerBuilder`]:
//!
//! ```rust,no_run
//! use xypriss::server::{ServerBuilder, ServerConfig};
//! use xypriss::http::{HttpResponse, Method, RequestContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ServerBuilder::new(ServerConfig::default())
//!     .route(Method::GET, "/ping", |_ctx: RequestContext| async {
//!         Ok(HttpResponse::text("pong"))
//!     })?
//!     .build()?;
//! server.start(None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - **[`router`]** - trie routing with `:params`, `*`, `**`, and mounted
//!   sub-routers
//! - **[`middleware`]** - priority-ordered interceptor chain and the
//!   default error responder
//! - **[`cache`]** - response cache with TTL, tags, and singleflight
//!   builds
//! - **[`pool`]** - two-lane CPU/IO worker pool with deadlines and
//!   backpressure
//! - **[`precompiler`]** - hot-route learning and fast-path dispatch
//! - **[`arbiter`]** - port acquisition with auto-switch and force-close
//! - **[`cluster`]** - worker-process supervision over encrypted IPC
//! - **[`server`]** - the composed serving unit

pub use xypriss_core as core;
pub use xypriss_http as http;

#[cfg(feature = "arbiter")]
pub use xypriss_arbiter as arbiter;
#[cfg(feature = "cache")]
pub use xypriss_cache as cache;
#[cfg(feature = "cluster")]
pub use xypriss_cluster as cluster;
#[cfg(feature = "middleware")]
pub use xypriss_middleware as middleware;
#[cfg(feature = "pool")]
pub use xypriss_pool as pool;
#[cfg(feature = "precompiler")]
pub use xypriss_precompiler as precompiler;
#[cfg(feature = "router")]
pub use xypriss_router as router;
#[cfg(feature = "server")]
pub use xypriss_server as server;

pub use xypriss_core::{ErrorKind, ServerError};
