//! Middleware execution for XyPriss.
//!
//! A [`MiddlewareChain`] is an ordered list of interceptors wrapping a
//! terminal [`Handler`]. Each middleware receives the request context and a
//! [`Next`] cursor; calling [`Next::run`] continues the chain, returning a
//! response without calling it short-circuits. Errors propagate outward
//! through the chain (any middleware that called `next` can observe and
//! replace them) and uncaught errors reach the [`ErrorResponder`], the
//! single sink that maps the error taxonomy to HTTP statuses.
//!
//! Ordering: priorities `Critical > High > Normal > Low`; within a priority,
//! registration order is preserved. The chain is compiled once into a flat
//! immutable stage list and shared across requests.
//!
//! # Example
//!
//! ```rust
//! use xypriss_middleware::{ChainBuilder, Middleware, MiddlewareFuture, MiddlewarePriority, Next};
//! use xypriss_http::{HttpResponse, RequestContext};
//!
//! struct ServerHeader;
//!
//! impl Middleware for ServerHeader {
//!     fn handle(&self, ctx: RequestContext, next: Next) -> MiddlewareFuture {
//!         Box::pin(async move {
//!             let response = next.run(ctx).await?;
//!             Ok(response.with_header("server", "xypriss"))
//!         })
//!     }
//! }
//!
//! let chain = ChainBuilder::new()
//!     .register(MiddlewarePriority::Normal, ServerHeader)
//!     .build();
//! # let _ = chain;
//! ```

mod chain;
mod handler;
mod responder;

pub use chain::{ChainBuilder, MiddlewareChain, MiddlewareFuture, MiddlewarePriority, Next};
pub use handler::{BoxedHandler, Handler};
pub use responder::ErrorResponder;

use xypriss_http::RequestContext;

/// An interceptor in the request path.
///
/// Implementations take the context by value; mutation after the response
/// has started is impossible because the context is consumed by the stage
/// that produces the response.
pub trait Middleware: Send + Sync {
    /// Processes the request, either delegating via `next.run(ctx)` or
    /// short-circuiting by returning a response (or error) directly.
    fn handle(&self, ctx: RequestContext, next: Next) -> MiddlewareFuture;

    /// Name used in logs.
    fn name(&self) -> &str {
        "<middleware>"
    }
}
