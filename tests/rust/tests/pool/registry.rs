//! One pool per (connection type, endpoint)

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use hostlink_connect::transports::{HttpConnection, HttpConnectionFactory};
use hostlink_connect::{ConnectionFactory, Connector, PoolRegistry};
use pretty_assertions::assert_eq;
use tests::fixtures::{pool_config, unique_endpoint};
use tests::{MockConnection, MockFactory};

#[tokio::test]
async fn test_distinct_endpoints_get_distinct_pools() {
    let registry = PoolRegistry::new();
    let factory = MockFactory::new();

    let first = registry
        .get_or_create(factory.as_factory(), unique_endpoint(), pool_config(1, 2))
        .await;
    let second = registry
        .get_or_create(factory.as_factory(), unique_endpoint(), pool_config(1, 2))
        .await;

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_connectors_for_same_endpoint_share_global_pool() {
    let factory = MockFactory::new();
    let endpoint = unique_endpoint();

    let first = Connector::new(factory.as_factory(), Arc::clone(&endpoint), pool_config(1, 2)).await;
    let second = Connector::new(factory.as_factory(), Arc::clone(&endpoint), pool_config(5, 9)).await;

    assert!(Arc::ptr_eq(first.pool(), second.pool()));
    // The first caller's configuration wins
    assert_eq!(second.pool().config().max_total, 2);

    let connection = second.pool().acquire().await.unwrap();
    first.pool().release(connection).await.unwrap();
    assert_eq!(first.pool().stats().await.idle, 1);

    assert!(PoolRegistry::global().remove::<MockConnection>(&endpoint).await);
}

#[tokio::test]
async fn test_equal_endpoint_values_share_pool() {
    let registry = PoolRegistry::new();
    let factory = MockFactory::new();
    let endpoint = unique_endpoint();
    let copy = Arc::new(endpoint.as_ref().clone());

    let first = registry.get_or_create(factory.as_factory(), endpoint, pool_config(1, 1)).await;
    let second = registry.get_or_create(factory.as_factory(), copy, pool_config(1, 1)).await;

    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_connection_types_get_separate_pools_for_one_endpoint() {
    let registry = PoolRegistry::new();
    let endpoint = unique_endpoint();

    let mock = registry
        .get_or_create(MockFactory::new().as_factory(), Arc::clone(&endpoint), pool_config(1, 1))
        .await;
    let http_factory: Arc<dyn ConnectionFactory<HttpConnection>> = Arc::new(HttpConnectionFactory::default());
    let http = registry
        .get_or_create(http_factory, Arc::clone(&endpoint), pool_config(1, 1))
        .await;

    assert_eq!(registry.len().await, 2);
    assert!(mock.name().starts_with("mock_"));
    assert!(http.name().starts_with("http_"));
    assert!(registry.get::<MockConnection>(&endpoint).await.is_some());
    assert!(registry.get::<HttpConnection>(&endpoint).await.is_some());

    let kinds: Vec<_> = {
        let mut kinds: Vec<_> = registry.stats().await.into_iter().map(|(key, _)| key.kind()).collect();
        kinds.sort();
        kinds
    };
    assert_eq!(kinds, vec!["http", "mock"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_creates_one_pool() {
    let registry = Arc::new(PoolRegistry::new());
    let factory = MockFactory::new();
    let endpoint = unique_endpoint();

    let lookups = (0..16).map(|_| {
        let registry = Arc::clone(&registry);
        let factory = Arc::clone(&factory);
        let endpoint = Arc::clone(&endpoint);
        tokio::spawn(async move {
            registry
                .get_or_create(factory.as_factory(), endpoint, pool_config(2, 2).warm_up(true))
                .await
        })
    });

    let pools: Vec<_> = join_all(lookups).await.into_iter().map(Result::unwrap).collect();
    assert!(pools.iter().all(|pool| Arc::ptr_eq(pool, &pools[0])));
    assert_eq!(registry.len().await, 1);
    // Warm-up ran once
    assert_eq!(factory.counters.created(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_warm_up_does_not_block_other_endpoints() {
    let registry = Arc::new(PoolRegistry::new());
    let slow = MockFactory::slow(Duration::from_millis(500));

    let warming = {
        let registry = Arc::clone(&registry);
        let slow = Arc::clone(&slow);
        tokio::spawn(async move {
            registry
                .get_or_create(slow.as_factory(), unique_endpoint(), pool_config(3, 3).warm_up(true))
                .await
        })
    };
    // Let the slow pool start warming up
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let other = registry
        .get_or_create(MockFactory::new().as_factory(), unique_endpoint(), pool_config(1, 1))
        .await;
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(200), "waited {:?}", elapsed);
    assert!(!other.is_closed().await);

    let warmed = warming.await.unwrap();
    assert_eq!(warmed.stats().await.idle, 3);
    assert_eq!(slow.counters.created(), 3);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_pool_removed_during_warm_up_is_closed() {
    let registry = Arc::new(PoolRegistry::new());
    let slow = MockFactory::slow(Duration::from_millis(100));
    let endpoint = unique_endpoint();

    let warming = {
        let registry = Arc::clone(&registry);
        let slow = Arc::clone(&slow);
        let endpoint = Arc::clone(&endpoint);
        tokio::spawn(async move {
            registry
                .get_or_create(slow.as_factory(), endpoint, pool_config(2, 2).warm_up(true))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Not built yet, so nothing to close and no lookup result
    assert!(registry.get::<MockConnection>(&endpoint).await.is_none());
    assert!(registry.remove::<MockConnection>(&endpoint).await);

    let orphan = warming.await.unwrap();
    assert!(orphan.is_closed().await);
    assert_eq!(slow.counters.closed(), 2);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_remove_closes_pool() {
    let registry = PoolRegistry::new();
    let factory = MockFactory::new();
    let endpoint = unique_endpoint();

    let pool = registry
        .get_or_create(factory.as_factory(), Arc::clone(&endpoint), pool_config(1, 1).warm_up(true))
        .await;

    assert!(registry.remove::<MockConnection>(&endpoint).await);
    assert!(!registry.remove::<MockConnection>(&endpoint).await);
    assert!(pool.is_closed().await);
    assert!(registry.get::<MockConnection>(&endpoint).await.is_none());
    assert_eq!(factory.counters.closed(), 1);

    let fresh = registry
        .get_or_create(factory.as_factory(), endpoint, pool_config(1, 1))
        .await;
    assert!(!Arc::ptr_eq(&pool, &fresh));
}

#[tokio::test]
async fn test_close_all_empties_registry() {
    let registry = PoolRegistry::new();
    let factory = MockFactory::new();

    let pools = vec![
        registry.get_or_create(factory.as_factory(), unique_endpoint(), pool_config(1, 1)).await,
        registry.get_or_create(factory.as_factory(), unique_endpoint(), pool_config(1, 1)).await,
    ];
    registry.close_all().await;

    assert!(registry.is_empty().await);
    for pool in pools {
        assert!(pool.is_closed().await);
    }
}
