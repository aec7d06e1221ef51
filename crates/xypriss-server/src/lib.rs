//! The XyPriss server core.
//!
//! [`ServerCore`] composes the components into one serving unit: the port
//! arbiter acquires the listener, every accepted connection is parsed by
//! hyper, and each request flows middleware chain → router → (pre-compiled
//! fast path) → handler, with the worker pool and response cache available
//! to handlers and the default error responder as the single error sink.
//!
//! # Example
//!
//! ```rust,no_run
//! use xypriss_server::{ServerBuilder, ServerConfig};
//! use xypriss_http::HttpResponse;
//! use http::Method;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ServerBuilder::new(ServerConfig::default())
//!     .route(Method::GET, "/hello/:name", |ctx: xypriss_http::RequestContext| async move {
//!         let name = ctx.param("name").unwrap_or("world").to_string();
//!         Ok(HttpResponse::text(format!("hello {name}")))
//!     })?
//!     .build()?;
//!
//! server.start(None).await?;
//! server.wait_for_ready().await;
//! println!("listening on port {}", server.port().unwrap());
//! # Ok(())
//! # }
//! ```
//!
//! In cluster mode the same binary runs twice: the parent builds a
//! [`xypriss_cluster::Supervisor`] via [`cluster::run_supervisor`] and each
//! child serves with a [`ServerCore`] attached to the control plane via
//! [`cluster::attach_worker_agent`].

pub mod cluster;
mod config;
mod server;

pub use config::{
    AutoPortSwitchConfig, CacheSection, CacheStrategyOption, ClusterSection,
    ClusterSecurityConfig, LaneSection, ListenerConfig, PortSwitchStrategy, PreCompilerSection,
    RequestSection, ServerConfig, WorkerPoolSection, WorkersOption,
};
pub use server::{Endpoint, ServerBuilder, ServerCore};
