//! Server assembly, lifecycle, and request dispatch.

use crate::config::{PortSwitchStrategy, ServerConfig};
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use xypriss_arbiter::{AcquireOptions, AutoSwitch, ForceCloseOutcome, PortArbiter, SwitchStrategy};
use xypriss_cache::{CacheConfig, CacheStrategy, ResponseCache};
use xypriss_core::{ErrorKind, ServerError};
use xypriss_http::{HttpRequest, HttpResponse, RequestContext};
use xypriss_middleware::{
    BoxedHandler, ChainBuilder, ErrorResponder, Handler, Middleware, MiddlewareChain,
    MiddlewarePriority,
};
use xypriss_pool::{WorkerPool, WorkerPoolConfig};
use xypriss_precompiler::{
    OptimizationLevel, PreCompiler, PreCompilerConfig, ResponseGenerator, RouteKey,
};
use xypriss_router::{MatchError, RouteId, Router};

/// Bodies larger than this never become ultra templates.
const MAX_TEMPLATE_BODY: usize = 64 * 1024;

/// A registered route target: the handler plus its route-scoped
/// middleware.
#[derive(Clone)]
pub struct Endpoint {
    handler: BoxedHandler,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Endpoint {
    pub fn new<H>(handler: H) -> Self
    where
        H: Handler + 'static,
    {
        Self {
            handler: Arc::new(handler),
            middleware: Vec::new(),
        }
    }

    /// Attaches route-scoped middleware, run after the global chain.
    pub fn with_middleware(mut self, middleware: Vec<Arc<dyn Middleware>>) -> Self {
        self.middleware = middleware;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running(SocketAddr),
    Stopped,
}

struct RunState {
    cancel: CancellationToken,
    accept: JoinHandle<()>,
}

struct ServerInner {
    config: ServerConfig,
    router: RwLock<Arc<Router<Endpoint>>>,
    full_chain: MiddlewareChain,
    fast_chain: MiddlewareChain,
    cache: Option<ResponseCache<HttpResponse>>,
    pool: WorkerPool,
    precompiler: Option<Arc<PreCompiler<HttpResponse>>>,
    responder: ErrorResponder,
    arbiter: PortArbiter,
    reuse_port: bool,
    draining: AtomicBool,
    active_connections: AtomicUsize,
    drained: Notify,
    conn_limit: Arc<Semaphore>,
    connections: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: watch::Sender<Lifecycle>,
}

/// Builder assembling configuration, routes, middleware, and generators
/// into a [`ServerCore`].
pub struct ServerBuilder {
    config: ServerConfig,
    router: Router<Endpoint>,
    stages: Vec<(MiddlewarePriority, Arc<dyn Middleware>)>,
    generators: Vec<Box<dyn FnOnce(&PreCompiler<HttpResponse>) + Send>>,
    reuse_port: bool,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            stages: Vec::new(),
            generators: Vec::new(),
            reuse_port: false,
        }
    }

    /// Registers a route.
    pub fn route<H>(self, method: Method, pattern: &str, handler: H) -> Result<Self, ServerError>
    where
        H: Handler + 'static,
    {
        self.route_with(method, pattern, Vec::new(), handler)
    }

    /// Registers a route with route-scoped middleware, run after the
    /// global chain.
    pub fn route_with<H>(
        mut self,
        method: Method,
        pattern: &str,
        middleware: Vec<Arc<dyn Middleware>>,
        handler: H,
    ) -> Result<Self, ServerError>
    where
        H: Handler + 'static,
    {
        self.router
            .route(
                method,
                pattern,
                Endpoint {
                    handler: Arc::new(handler),
                    middleware,
                },
            )
            .map_err(|err| ServerError::new(ErrorKind::InvalidConfig, err.to_string()))?;
        Ok(self)
    }

    /// Mounts a pre-built sub-router at a prefix.
    pub fn mount(mut self, prefix: &str, sub: Router<Endpoint>) -> Result<Self, ServerError> {
        self.router
            .mount(prefix, sub)
            .map_err(|err| ServerError::new(ErrorKind::InvalidConfig, err.to_string()))?;
        Ok(self)
    }

    /// Registers a global middleware.
    pub fn middleware<M>(mut self, priority: MiddlewarePriority, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.stages.push((priority, Arc::new(middleware)));
        self
    }

    /// Registers a host response generator consulted by the pre-compiler.
    pub fn response_generator<G>(mut self, generator: G) -> Self
    where
        G: ResponseGenerator<HttpResponse> + 'static,
    {
        self.generators
            .push(Box::new(move |pc| pc.register_generator(generator)));
        self
    }

    /// Shares the listening port with sibling worker processes
    /// (`SO_REUSEPORT`); cluster workers turn this on.
    pub fn reuse_port(mut self, reuse: bool) -> Self {
        self.reuse_port = reuse;
        self
    }

    pub fn build(self) -> Result<ServerCore, ServerError> {
        self.config.validate()?;

        // The fast chain keeps only the stages an advanced compiled route
        // still runs.
        let mut full = ChainBuilder::new();
        let mut fast = ChainBuilder::new();
        for (priority, stage) in &self.stages {
            full = full.register_shared(*priority, Arc::clone(stage));
            if matches!(
                priority,
                MiddlewarePriority::Critical | MiddlewarePriority::High
            ) {
                fast = fast.register_shared(*priority, Arc::clone(stage));
            }
        }

        let cache = self.config.cache.enabled.then(|| {
            ResponseCache::new(
                CacheConfig::builder()
                    .name("responses")
                    .strategy(match self.config.cache.strategy {
                        crate::config::CacheStrategyOption::Memory => CacheStrategy::Memory,
                        crate::config::CacheStrategyOption::Redis => CacheStrategy::Redis,
                        crate::config::CacheStrategyOption::Hybrid => CacheStrategy::Hybrid,
                    })
                    .max_size_bytes(self.config.cache.max_size)
                    .default_ttl(self.config.cache_ttl())
                    .build(),
            )
        });

        let pool = WorkerPool::new(
            WorkerPoolConfig::builder()
                .name("server")
                .cpu(self.config.worker_pool.cpu.min, self.config.worker_pool.cpu.max)
                .io(self.config.worker_pool.io.min, self.config.worker_pool.io.max)
                .max_queued_tasks(self.config.worker_pool.max_concurrent_tasks)
                .default_deadline(Some(self.config.request_timeout()))
                .build(),
        );

        let precompiler = self.config.pre_compiler.enabled.then(|| {
            let pc = PreCompiler::new(
                PreCompilerConfig::builder()
                    .name("dispatch")
                    .learning_period(Duration::from_secs(self.config.pre_compiler.learning_period))
                    .optimization_threshold(self.config.pre_compiler.optimization_threshold)
                    .max_compiled_routes(self.config.pre_compiler.max_compiled_routes)
                    .aggressive_optimization(self.config.pre_compiler.aggressive_optimization)
                    .predictive_preloading(self.config.pre_compiler.predictive_preloading)
                    .build(),
            );
            for (id, method, pattern, _) in self.router.routes() {
                pc.register_route(RouteKey(id.index() as u64), method.as_str(), pattern);
            }
            for install in self.generators {
                install(&pc);
            }
            Arc::new(pc)
        });

        let (lifecycle, _) = watch::channel(Lifecycle::Idle);
        Ok(ServerCore {
            inner: Arc::new(ServerInner {
                conn_limit: Arc::new(Semaphore::new(self.config.request.max_connections)),
                config: self.config,
                router: RwLock::new(Arc::new(self.router)),
                full_chain: full.build(),
                fast_chain: fast.build(),
                cache,
                pool,
                precompiler,
                responder: ErrorResponder::new(),
                arbiter: PortArbiter::new(),
                reuse_port: self.reuse_port,
                draining: AtomicBool::new(false),
                active_connections: AtomicUsize::new(0),
                drained: Notify::new(),
                connections: Mutex::new(Vec::new()),
                lifecycle,
            }),
            run: tokio::sync::Mutex::new(None),
        })
    }
}

/// The composed serving unit. One active listener per instance.
pub struct ServerCore {
    inner: Arc<ServerInner>,
    run: tokio::sync::Mutex<Option<RunState>>,
}

impl ServerCore {
    /// Acquires the listener (auto-switching if configured) and enters the
    /// accept loop. `port` overrides the configured port.
    pub async fn start(&self, port: Option<u16>) -> Result<SocketAddr, ServerError> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return Err(ServerError::new(
                ErrorKind::InvalidConfig,
                "server already has an active listener",
            ));
        }

        let host: std::net::IpAddr = self
            .inner
            .config
            .server
            .host
            .parse()
            .map_err(|_| ServerError::new(ErrorKind::InvalidConfig, "bad host"))?;
        let port = port.unwrap_or(self.inner.config.server.port);

        let mut opts = AcquireOptions::new().reuse_port(self.inner.reuse_port);
        let auto = &self.inner.config.server.auto_port_switch;
        if auto.enabled {
            opts = opts.auto_switch(AutoSwitch {
                range: auto.port_range,
                strategy: match auto.strategy {
                    PortSwitchStrategy::Increment => SwitchStrategy::Increment,
                    PortSwitchStrategy::Random => SwitchStrategy::Random,
                },
                max_attempts: auto.max_attempts,
            });
        }

        let socket = self.inner.arbiter.acquire(host, port, &opts).await?;
        let addr = socket.addr();
        self.inner.draining.store(false, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let state = RunState {
            cancel: cancel.clone(),
            accept: tokio::spawn(accept_loop(
                Arc::clone(&self.inner),
                socket.into_listener(),
                cancel,
            )),
        };
        *run = Some(state);
        let _ = self.inner.lifecycle.send(Lifecycle::Running(addr));

        #[cfg(feature = "tracing")]
        tracing::info!(%addr, "server listening");
        Ok(addr)
    }

    /// Resolves once the listener is accepting.
    pub async fn wait_for_ready(&self) {
        let mut rx = self.inner.lifecycle.subscribe();
        loop {
            if matches!(*rx.borrow(), Lifecycle::Running(_)) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// The bound port, while running.
    pub fn port(&self) -> Option<u16> {
        match *self.inner.lifecycle.borrow() {
            Lifecycle::Running(addr) => Some(addr.port()),
            _ => None,
        }
    }

    /// Stops accepting, drains in-flight requests up to `timeout`, then
    /// aborts stragglers and releases the socket.
    pub async fn stop(&self, timeout: Duration) -> Result<(), ServerError> {
        let state = self.run.lock().await.take().ok_or_else(|| {
            ServerError::new(ErrorKind::InvalidConfig, "server is not running")
        })?;

        self.inner.draining.store(true, Ordering::SeqCst);
        state.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), state.accept).await;

        let deadline = Instant::now() + timeout;
        while self.inner.active_connections.load(Ordering::SeqCst) > 0 {
            let wait = tokio::time::timeout_at(deadline, self.inner.drained.notified()).await;
            if wait.is_err() {
                break;
            }
        }
        for connection in self.inner.connections.lock().drain(..) {
            connection.abort();
        }

        let _ = self.inner.lifecycle.send(Lifecycle::Stopped);
        #[cfg(feature = "tracing")]
        tracing::info!("server stopped");
        Ok(())
    }

    /// Marks the server draining: running requests finish, new requests on
    /// kept-alive connections receive 503, the listener keeps refusing.
    pub fn begin_drain(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
    }

    /// True once draining finished (no in-flight requests).
    pub fn is_drained(&self) -> bool {
        self.inner.active_connections.load(Ordering::SeqCst) == 0
    }

    /// Forcibly evicts whatever holds `port`. Delegates to the arbiter.
    pub async fn force_close_port(&self, port: u16) -> Result<ForceCloseOutcome, ServerError> {
        Ok(self.inner.arbiter.force_close(port).await?)
    }

    /// The response cache, when enabled.
    pub fn cache(&self) -> Option<&ResponseCache<HttpResponse>> {
        self.inner.cache.as_ref()
    }

    /// The worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Atomically replaces the route table and releases all compiled
    /// dispatch state.
    pub fn reload_routes(&self, router: Router<Endpoint>) {
        if let Some(pc) = &self.inner.precompiler {
            for (id, method, pattern, _) in router.routes() {
                pc.register_route(RouteKey(id.index() as u64), method.as_str(), pattern);
            }
            pc.invalidate_all();
        }
        *self.inner.router.write() = Arc::new(router);
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: tokio::net::TcpListener,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = cancel.cancelled() => return,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(_) => continue,
        };

        // Connection limit: shed load instead of queueing accepts.
        let Ok(permit) = Arc::clone(&inner.conn_limit).try_acquire_owned() else {
            drop(stream);
            continue;
        };

        let conn_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            conn_inner.active_connections.fetch_add(1, Ordering::SeqCst);
            let io = TokioIo::new(stream);
            let service_inner = Arc::clone(&conn_inner);
            let service = service_fn(move |req| dispatch(Arc::clone(&service_inner), peer, req));
            let served = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await;
            if let Err(_err) = served {
                #[cfg(feature = "tracing")]
                tracing::debug!("connection ended: {_err}");
            }
            if conn_inner.active_connections.fetch_sub(1, Ordering::SeqCst) == 1 {
                conn_inner.drained.notify_waiters();
            }
        });

        // Track for forced teardown on stop; prune finished entries so
        // the registry stays bounded.
        let mut connections = inner.connections.lock();
        connections.retain(|h| !h.is_finished());
        connections.push(handle);
    }
}

async fn dispatch(
    inner: Arc<ServerInner>,
    peer: SocketAddr,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<hyper::Response<Full<Bytes>>, std::convert::Infallible> {
    let response = handle_request(&inner, peer, req).await;
    Ok(to_hyper(response))
}

async fn handle_request(
    inner: &Arc<ServerInner>,
    peer: SocketAddr,
    req: hyper::Request<hyper::body::Incoming>,
) -> HttpResponse {
    let responder = inner.responder;

    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    // Body first: a draining server still reads the wire so the peer gets
    // a response rather than a reset.
    let body = match Limited::new(body, inner.config.request.max_body_bytes)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            let err = ServerError::new(ErrorKind::PayloadTooLarge, "request body too large");
            return responder.response(&err, "-", true);
        }
    };

    let request = HttpRequest::new(parts.method.clone(), &target, parts.headers, body)
        .with_peer_addr(peer);
    let accepts_json = request.accepts_json();
    let deadline = Instant::now() + inner.config.request_timeout();
    let mut ctx = RequestContext::new(request).with_deadline(deadline.into_std());
    let correlation_id = ctx.correlation_id().to_string();

    if inner.draining.load(Ordering::SeqCst) {
        let err = ServerError::new(ErrorKind::ShuttingDown, "server is draining");
        return responder.response(&err, &correlation_id, accepts_json);
    }

    let router = Arc::clone(&inner.router.read());
    let (route_id, params, endpoint) = match router.lookup(&parts.method, ctx.path()) {
        Ok(found) => (found.route_id, found.params, found.value.clone()),
        Err(MatchError::NotFound) => {
            let err = ServerError::new(ErrorKind::NotFound, "no route matches the path");
            return responder.response(&err, &correlation_id, accepts_json);
        }
        Err(MatchError::MethodNotAllowed { allow }) => {
            return responder.method_not_allowed(&allow, &correlation_id, accepts_json);
        }
    };

    let key = route_key(route_id);
    let started = Instant::now();

    // Compiled fast path.
    let mut chain = &inner.full_chain;
    if let Some(pc) = &inner.precompiler {
        if let Some(fast) = pc.fast_path(key) {
            if let Some(template) = fast.template {
                pc.observe(key, started.elapsed(), false);
                return template
                    .payload
                    .with_header("cache-control", format!("max-age={}", template.ttl.as_secs()));
            }
            if fast.level >= OptimizationLevel::Advanced {
                chain = &inner.fast_chain;
            }
        }
    }

    ctx.set_params(params);
    let outcome = tokio::time::timeout_at(
        deadline,
        chain.execute_with(ctx, &endpoint.middleware, endpoint.handler),
    )
    .await;
    let result = match outcome {
        Ok(result) => result,
        Err(_elapsed) => Err(ServerError::new(
            ErrorKind::Timeout,
            "request deadline elapsed",
        )),
    };

    let latency: Duration = started.elapsed();
    let method = parts.method;
    let response = match result {
        Ok(response) => {
            if let Some(pc) = &inner.precompiler {
                pc.observe(key, latency, response.status().is_server_error());
                if method == Method::GET
                    && response.status() == StatusCode::OK
                    && response.body_bytes().len() <= MAX_TEMPLATE_BODY
                {
                    pc.observe_shape(key, response_shape(&response), Some(&response));
                }
            }
            response
        }
        Err(err) => {
            if let Some(pc) = &inner.precompiler {
                pc.observe(key, latency, true);
            }
            responder.response(&err, &correlation_id, accepts_json)
        }
    };

    #[cfg(feature = "metrics")]
    metrics::counter!(
        "xypriss_requests_total",
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);

    response
}

fn route_key(id: RouteId) -> RouteKey {
    RouteKey(id.index() as u64)
}

/// Fingerprint of a response's observable shape for template stability.
fn response_shape(response: &HttpResponse) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    response.status().as_u16().hash(&mut hasher);
    response.body_bytes().hash(&mut hasher);
    hasher.finish()
}

fn to_hyper(response: HttpResponse) -> hyper::Response<Full<Bytes>> {
    let (status, headers, body) = response.into_parts();
    let mut builder = hyper::Response::builder().status(status);
    if let Some(map) = builder.headers_mut() {
        *map = headers;
    }
    builder
        .body(Full::new(body))
        .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.request.max_body_bytes = 1024;
        config
    }

    fn build_server() -> ServerCore {
        ServerBuilder::new(test_config())
            .route(Method::GET, "/hello/:name", |ctx: RequestContext| async move {
                let name = ctx.param("name").unwrap_or("world").to_string();
                Ok(HttpResponse::text(format!("hello {name}")))
            })
            .unwrap()
            .route(Method::GET, "/api/**", |ctx: RequestContext| async move {
                Ok(HttpResponse::text(format!(
                    "rest={}",
                    ctx.param("**").unwrap_or("")
                )))
            })
            .unwrap()
            .route(Method::PUT, "/thing", |_ctx: RequestContext| async {
                Ok(HttpResponse::ok())
            })
            .unwrap()
            .route(Method::GET, "/boom", |_ctx: RequestContext| async {
                Err(ServerError::new(ErrorKind::HandlerError, "handler failed"))
            })
            .unwrap()
            .build()
            .unwrap()
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        raw_request(
            addr,
            &format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n"),
        )
        .await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_param_route() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();
        server.wait_for_ready().await;

        let response = get(addr, "/hello/jane").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("hello jane"));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deep_wildcard_capture() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();

        let response = get(addr, "/api/v1/users/42").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("rest=v1/users/42"));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_not_found_shape() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();

        let response = get(addr, "/missing").await;
        assert!(response.starts_with("HTTP/1.1 404"));
        assert!(response.contains("\"error\":\"NotFound\""));
        assert!(response.contains("correlationId"));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_method_not_allowed_carries_allow() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();

        let response = raw_request(
            addr,
            "POST /thing HTTP/1.1\r\nHost: t\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 405"));
        let lower = response.to_lowercase();
        assert!(lower.contains("allow: put"));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handler_error_is_sanitized_500() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();

        let response = get(addr, "/boom").await;
        assert!(response.starts_with("HTTP/1.1 500"));
        assert!(response.contains("\"error\":\"HandlerError\""));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_payload_too_large() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();

        let body = "x".repeat(4096);
        let request = format!(
            "PUT /thing HTTP/1.1\r\nHost: t\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let response = raw_request(addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 413"));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_second_start_rejected() {
        let server = build_server();
        server.start(Some(0)).await.unwrap();
        assert!(server.start(Some(0)).await.is_err());
        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_refuses_new_connections() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();
        assert_eq!(server.port(), Some(addr.port()));

        server.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(server.port(), None);

        let refused = tokio::time::timeout(
            Duration::from_millis(500),
            tokio::net::TcpStream::connect(addr),
        )
        .await;
        match refused {
            Ok(Ok(mut stream)) => {
                // Accepted by a lingering backlog entry at worst; it must
                // not serve anything.
                stream
                    .write_all(b"GET / HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
                    .await
                    .ok();
                let mut buf = Vec::new();
                let _ = stream.read_to_end(&mut buf).await;
                assert!(buf.is_empty());
            }
            _ => {}
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_draining_returns_503() {
        let server = build_server();
        let addr = server.start(Some(0)).await.unwrap();

        server.begin_drain();
        let response = get(addr, "/hello/x").await;
        assert!(response.starts_with("HTTP/1.1 503"));
        assert!(response.contains("ShuttingDown"));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }
}
