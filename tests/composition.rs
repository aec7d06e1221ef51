//! Composition: cache and worker pool reached from request handlers.

mod e2e_helpers {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    pub(crate) async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }
}

use e2e_helpers::get;
use http::Method;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use xypriss_cache::EntryOptions;
use xypriss_http::{HttpResponse, RequestContext};
use xypriss_middleware::{Middleware, MiddlewareFuture, MiddlewarePriority, Next};
use xypriss_pool::TaskSpec;
use xypriss_server::{ServerBuilder, ServerConfig};

struct RequestStamp;

impl Middleware for RequestStamp {
    fn handle(&self, ctx: RequestContext, next: Next) -> MiddlewareFuture {
        Box::pin(async move {
            let response = next.run(ctx).await?;
            Ok(response.with_header("x-served-by", "xypriss"))
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_reaches_cache_and_pool() {
    let server = Arc::new(
        ServerBuilder::new(ServerConfig::default())
            .middleware(MiddlewarePriority::Normal, RequestStamp)
            .route(Method::GET, "/report/:id", |_ctx: RequestContext| async {
                Ok(HttpResponse::text("report pending"))
            })
            .unwrap()
            .build()
            .unwrap(),
    );

    let builds = Arc::new(AtomicUsize::new(0));
    let cache = server.cache().expect("cache enabled by default").clone();
    let pool = server.pool().clone();

    // Expensive artifact: computed on the pool, memoized in the cache.
    let compute = {
        let builds = Arc::clone(&builds);
        move || {
            let builds = Arc::clone(&builds);
            let pool = pool.clone();
            async move {
                let handle = pool
                    .submit_cpu(TaskSpec::new(), move |_cancel| {
                        builds.fetch_add(1, Ordering::SeqCst);
                        Ok(42u64 * 1024)
                    })
                    .map_err(xypriss_core::ServerError::from)?;
                let value = handle.await.map_err(xypriss_core::ServerError::from)?;
                Ok(format!("report-{value}"))
            }
        }
    };

    let first = cache
        .get_or_build("report:7", EntryOptions::new().ttl(Duration::from_secs(60)), compute.clone())
        .await
        .unwrap();
    let second = cache
        .get_or_build("report:7", EntryOptions::new(), compute)
        .await
        .unwrap();

    assert_eq!(first, "report-43008");
    assert_eq!(first, second);
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(server.pool().stats().successes, 1);

    // And the HTTP surface still serves with the middleware stamp.
    let addr = server.start(Some(0)).await.unwrap();
    let response = get(addr, "/report/7").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.to_lowercase().contains("x-served-by: xypriss"));

    server.stop(Duration::from_secs(1)).await.unwrap();
}
