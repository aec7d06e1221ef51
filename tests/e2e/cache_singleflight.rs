//! Cache guarantees under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use xypriss_cache::{CacheConfig, EntryOptions, ResponseCache};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_concurrent_builders_share_one_build() {
    let cache: ResponseCache<String> =
        ResponseCache::new(CacheConfig::builder().name("singleflight").build());
    let builds = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        let builds = Arc::clone(&builds);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_build("k", EntryOptions::new(), move || async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok("artifact".to_string())
                })
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), "artifact");
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().builds, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn build_failure_reaches_every_waiter() {
    let cache: ResponseCache<String> =
        ResponseCache::new(CacheConfig::builder().name("failures").build());
    let builds = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let builds = Arc::clone(&builds);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_build("k", EntryOptions::new(), move || async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Err::<String, _>(xypriss_core::ServerError::new(
                        xypriss_core::ErrorKind::UpstreamUnavailable,
                        "backend down",
                    ))
                })
                .await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().is_err());
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn ttl_boundary_is_exact_enough() {
    let cache: ResponseCache<&'static str> = ResponseCache::new(
        CacheConfig::builder().default_ttl(None).build(),
    );
    cache.set(
        "k",
        "v",
        EntryOptions::new().ttl(Duration::from_secs(10)),
    );

    tokio::time::advance(Duration::from_secs(9)).await;
    assert_eq!(cache.get("k"), Some("v"));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get("k"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tag_invalidation_counts_entries() {
    let cache: ResponseCache<u32> =
        ResponseCache::new(CacheConfig::builder().build());
    cache.set("a", 1, EntryOptions::new().tag("users").tag("hot"));
    cache.set("b", 2, EntryOptions::new().tag("users"));
    cache.set("c", 3, EntryOptions::new().tag("orders"));

    assert_eq!(cache.invalidate_tag("users"), 2);
    assert_eq!(cache.get("c"), Some(3));
    assert_eq!(cache.invalidate_pattern("c"), 1);
}
