//! End-to-end throttling scenarios: the client's traffic riding the bridge
//! against the shared limiter registry, observed from the backend side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sceneforge_e2e::{client_with_bridge, init_tracing, MockBackend};
use sceneforge_harness::bridge::RequestInterceptor;
use sceneforge_harness::limiter::{LimiterConfig, RateLimiterRegistry, RegistryConfig};
use sceneforge_harness::ops;

fn registry_with(config: RegistryConfig) -> Arc<RequestInterceptor> {
    Arc::new(RequestInterceptor::new(Arc::new(RateLimiterRegistry::new(
        config,
    ))))
}

#[tokio::test]
async fn post_quota_defers_excess_creates_to_later_windows() {
    init_tracing();
    let backend = MockBackend::spawn().await;

    let window = Duration::from_millis(300);
    let bridge = registry_with(RegistryConfig {
        api_post: LimiterConfig::new(2).with_window(window),
        ..RegistryConfig::default()
    });
    let client = Arc::new(client_with_bridge(&backend, bridge));

    let started = Instant::now();
    let mut handles = Vec::new();
    for i in 0..6 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            ops::create_project(&client, &format!("burst {i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    let elapsed = started.elapsed();

    // Six creates at two per window need at least two replenishments.
    assert!(elapsed >= window * 2, "finished too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "throttling stalled: {elapsed:?}");
}

#[tokio::test]
async fn strict_concurrency_bound_is_visible_at_the_backend() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let project_id = backend.seed_project("hot project", &["Main"]);

    let bridge = registry_with(RegistryConfig {
        api_strict: LimiterConfig::new(100).with_max_concurrent(2),
        ..RegistryConfig::default()
    });
    let client = Arc::new(client_with_bridge(&backend, bridge));

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .start_publish(project_id, 1, &format!("app {i}"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Publishes are strict-class; the backend never saw more than the bound.
    assert!(
        backend.publish_peak() <= 2,
        "observed {} concurrent publishes",
        backend.publish_peak()
    );
}

#[tokio::test]
async fn bridged_requests_reach_the_backend_exactly_once() {
    init_tracing();
    let backend = MockBackend::spawn().await;
    let project_id = backend.seed_project("counted", &["Main"]);

    let bridge = registry_with(RegistryConfig::default());
    let client = client_with_bridge(&backend, bridge);

    let before = backend.total_requests();
    client.list_projects(None).await.unwrap();
    client.project(project_id).await.unwrap();
    client.list_scenes(project_id).await.unwrap();

    // Three calls, three requests: nothing duplicated, nothing dropped.
    assert_eq!(backend.total_requests() - before, 3);
}
