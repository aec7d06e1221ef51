//! Chain compilation and execution.

use crate::handler::BoxedHandler;
use crate::Middleware;
use futures::future::BoxFuture;
use std::sync::Arc;
use xypriss_core::ServerError;
use xypriss_http::{HttpResponse, RequestContext};

/// The future type every middleware stage and handler returns.
pub type MiddlewareFuture = BoxFuture<'static, Result<HttpResponse, ServerError>>;

/// Execution priority of a middleware. `Critical` runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MiddlewarePriority {
    Critical,
    High,
    Normal,
    Low,
}

/// Builder collecting middleware registrations before the chain is
/// compiled.
pub struct ChainBuilder {
    entries: Vec<(MiddlewarePriority, Arc<dyn Middleware>)>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers a middleware at the given priority.
    pub fn register<M>(mut self, priority: MiddlewarePriority, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.entries.push((priority, Arc::new(middleware)));
        self
    }

    /// Registers an already-shared middleware at the given priority.
    pub fn register_shared(
        mut self,
        priority: MiddlewarePriority,
        middleware: Arc<dyn Middleware>,
    ) -> Self {
        self.entries.push((priority, middleware));
        self
    }

    /// Compiles the chain: stable sort by priority, registration order
    /// preserved within a priority, flattened into an immutable stage list.
    pub fn build(mut self) -> MiddlewareChain {
        self.entries.sort_by_key(|(priority, _)| *priority);
        MiddlewareChain {
            stages: self
                .entries
                .into_iter()
                .map(|(_, middleware)| middleware)
                .collect::<Vec<_>>()
                .into(),
        }
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The compiled, immutable middleware chain.
///
/// Cloning is cheap (the stage list is shared); the server swaps the whole
/// chain atomically on hot reload.
#[derive(Clone)]
pub struct MiddlewareChain {
    stages: Arc<[Arc<dyn Middleware>]>,
}

impl MiddlewareChain {
    /// An empty chain that runs the handler directly.
    pub fn empty() -> Self {
        ChainBuilder::new().build()
    }

    /// Runs the chain for one request, terminating in `handler`.
    pub fn execute(&self, ctx: RequestContext, handler: BoxedHandler) -> MiddlewareFuture {
        let next = Next {
            stages: Arc::clone(&self.stages),
            index: 0,
            handler,
        };
        next.run(ctx)
    }

    /// Runs the chain with route-scoped stages appended after the global
    /// ones.
    pub fn execute_with(
        &self,
        ctx: RequestContext,
        route_stages: &[Arc<dyn Middleware>],
        handler: BoxedHandler,
    ) -> MiddlewareFuture {
        if route_stages.is_empty() {
            return self.execute(ctx, handler);
        }
        let stages: Arc<[Arc<dyn Middleware>]> = self
            .stages
            .iter()
            .chain(route_stages.iter())
            .cloned()
            .collect::<Vec<_>>()
            .into();
        let next = Next {
            stages,
            index: 0,
            handler,
        };
        next.run(ctx)
    }

    /// Number of compiled stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Cursor over the remaining stages of a chain.
///
/// Consumed by [`Next::run`]; a middleware that drops it without running it
/// short-circuits the chain.
pub struct Next {
    stages: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    handler: BoxedHandler,
}

impl Next {
    /// Runs the rest of the chain and the terminal handler.
    pub fn run(self, ctx: RequestContext) -> MiddlewareFuture {
        match self.stages.get(self.index) {
            Some(stage) => {
                let stage = Arc::clone(stage);
                let next = Next {
                    stages: self.stages,
                    index: self.index + 1,
                    handler: self.handler,
                };
                #[cfg(feature = "tracing")]
                tracing::trace!(middleware = stage.name(), "entering middleware");
                stage.handle(ctx, next)
            }
            None => self.handler.call(ctx),
        }
    }
}
