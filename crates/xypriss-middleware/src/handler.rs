//! The terminal handler seam.

use crate::chain::MiddlewareFuture;
use std::future::Future;
use std::sync::Arc;
use xypriss_core::ServerError;
use xypriss_http::{HttpResponse, RequestContext};

/// The endpoint a middleware chain terminates in.
///
/// Async closures implement this through the blanket impl, so route
/// registration can take ordinary `|ctx| async move { ... }` functions.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: RequestContext) -> MiddlewareFuture;
}

/// Shared handler reference as stored in route tables.
pub type BoxedHandler = Arc<dyn Handler>;

impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HttpResponse, ServerError>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> MiddlewareFuture {
        Box::pin((self)(ctx))
    }
}
