//! Routing scenarios through the HTTP front-end.

use super::{body_of, get, status_of};
use http::Method;
use std::time::Duration;
use xypriss_http::{HttpResponse, RequestContext};
use xypriss_server::{ServerBuilder, ServerConfig};

fn builder() -> ServerBuilder {
    ServerBuilder::new(ServerConfig::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deep_wildcard_captures_remainder() {
    let server = builder()
        .route(Method::GET, "/api/**", |ctx: RequestContext| async move {
            Ok(HttpResponse::text(ctx.param("**").unwrap_or("").to_string()))
        })
        .unwrap()
        .build()
        .unwrap();
    let addr = server.start(Some(0)).await.unwrap();
    server.wait_for_ready().await;

    let response = get(addr, "/api/v1/users/42").await;
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), "v1/users/42");

    server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn literal_wins_over_param() {
    let server = builder()
        .route(Method::GET, "/u/:id", |ctx: RequestContext| async move {
            Ok(HttpResponse::text(format!(
                "param:{}",
                ctx.param("id").unwrap_or("")
            )))
        })
        .unwrap()
        .route(Method::GET, "/u/me", |ctx: RequestContext| async move {
            assert!(ctx.params().is_empty());
            Ok(HttpResponse::text("literal"))
        })
        .unwrap()
        .build()
        .unwrap();
    let addr = server.start(Some(0)).await.unwrap();

    let response = get(addr, "/u/me").await;
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), "literal");

    let response = get(addr, "/u/42").await;
    assert_eq!(body_of(&response), "param:42");

    server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mounted_router_resolves_under_prefix() {
    let mut api = xypriss_router::Router::new();
    api.route(
        Method::GET,
        "/users/:id",
        xypriss_server::Endpoint::new(|ctx: RequestContext| async move {
            Ok(HttpResponse::text(format!(
                "user {}",
                ctx.param("id").unwrap_or("?")
            )))
        }),
    )
    .unwrap();

    let server = builder().mount("/api/v1", api).unwrap().build().unwrap();
    let addr = server.start(Some(0)).await.unwrap();

    let response = get(addr, "/api/v1/users/9").await;
    assert_eq!(body_of(&response), "user 9");

    server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_route_404_known_route_405() {
    let server = builder()
        .route(Method::PUT, "/resource", |_ctx: RequestContext| async {
            Ok(HttpResponse::ok())
        })
        .unwrap()
        .build()
        .unwrap();
    let addr = server.start(Some(0)).await.unwrap();

    let missing = get(addr, "/nowhere").await;
    assert_eq!(status_of(&missing), 404);
    assert!(missing.contains("\"error\":\"NotFound\""));

    let wrong_method = get(addr, "/resource").await;
    assert_eq!(status_of(&wrong_method), 405);
    assert!(wrong_method.to_lowercase().contains("allow: put"));

    server.stop(Duration::from_secs(1)).await.unwrap();
}
