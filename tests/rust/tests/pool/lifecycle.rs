//! Acquire / release / close behaviour of a single pool

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostlink_connect::{Connection, ConnectionPool, PoolError};
use pretty_assertions::assert_eq;
use tests::fixtures::{pool_config, unique_endpoint};
use tests::{MockConnection, MockFactory, MockRequest};

async fn new_pool(factory: &Arc<MockFactory>, max_idle: usize, max_total: usize) -> ConnectionPool<MockConnection> {
    ConnectionPool::new(factory.as_factory(), unique_endpoint(), pool_config(max_idle, max_total)).await
}

// =============================================================================
// Capacity
// =============================================================================

#[tokio::test]
async fn test_three_concurrent_acquires_fill_pool() {
    let factory = MockFactory::new();
    let pool = ConnectionPool::new(
        factory.as_factory(),
        unique_endpoint(),
        pool_config(2, 3).warm_up(true),
    )
    .await;
    assert_eq!(pool.stats().await.idle, 2);

    let (a, b, c) = tokio::join!(pool.acquire(), pool.acquire(), pool.acquire());
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    let ids: HashSet<_> = [a.id(), b.id(), c.id()].into_iter().collect();
    assert_eq!(ids.len(), 3);
    assert!(pool.is_full().await);
    assert_eq!(factory.counters.created(), 3);

    assert_eq!(pool.try_acquire().await.unwrap_err(), PoolError::Full);

    pool.release(a).await.unwrap();
    let stats = pool.stats().await;
    assert_eq!((stats.idle, stats.active), (1, 2));

    let reused = pool.acquire().await.unwrap();
    assert_eq!(factory.counters.created(), 3);
    assert!(ids.contains(&reused.id()));
}

#[tokio::test]
async fn test_idle_never_exceeds_max_idle_after_release() {
    let factory = MockFactory::new();
    let pool = new_pool(&factory, 2, 6).await;

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire().await.unwrap());
    }
    for connection in held {
        pool.release(connection).await.unwrap();
        assert!(pool.stats().await.idle <= 2);
    }

    let stats = pool.stats().await;
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.active, 0);
    assert_eq!(factory.counters.closed(), 3);
}

#[tokio::test]
async fn test_non_blocking_acquire_does_not_wait() {
    let factory = MockFactory::new();
    let pool = new_pool(&factory, 1, 1).await;
    let _held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let result = pool.try_acquire().await;
    assert_eq!(result.unwrap_err(), PoolError::Full);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_acquire_timeout_is_bounded() {
    let factory = MockFactory::new();
    let pool = new_pool(&factory, 1, 1).await;
    let _held = pool.acquire().await.unwrap();

    let timeout = Duration::from_millis(150);
    let started = Instant::now();
    let err = pool.acquire_timeout(timeout).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_full());
    assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_millis(500), "overshot: {:?}", elapsed);
}

#[tokio::test]
async fn test_acquire_timeout_succeeds_when_released_in_time() {
    let factory = MockFactory::new();
    let pool = Arc::new(new_pool(&factory, 1, 1).await);
    let held = pool.acquire().await.unwrap();

    let releaser = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pool.release(held).await
        })
    };

    let connection = pool.acquire_timeout(Duration::from_secs(5)).await.unwrap();
    releaser.await.unwrap().unwrap();
    assert_eq!(factory.counters.created(), 1);
    assert!(!connection.is_closed());
}

// =============================================================================
// Unavailable connections
// =============================================================================

#[tokio::test]
async fn test_unavailable_release_replaced_at_most_once() {
    let factory = MockFactory::new();
    let pool = new_pool(&factory, 2, 3).await;
    let connection = pool.acquire().await.unwrap();
    let broken = connection.id();

    factory.set_healthy(false);
    pool.release(connection).await.unwrap();

    // One replacement attempt; it was unhealthy too, so nothing is idle
    assert_eq!(factory.counters.created(), 2);
    assert_eq!(pool.stats().await.idle, 0);
    assert_eq!(factory.counters.close_counts().get(&broken), Some(&1));

    factory.set_healthy(true);
    let fresh = pool.acquire().await.unwrap();
    assert_ne!(fresh.id(), broken);
}

#[tokio::test]
async fn test_unavailable_release_not_replaced_when_idle_exists() {
    let factory = MockFactory::new();
    let pool = new_pool(&factory, 2, 3).await;
    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    pool.release(a).await.unwrap();

    factory.set_healthy(false);
    pool.release(b).await.unwrap();

    assert_eq!(factory.counters.created(), 2);
}

#[tokio::test]
async fn test_send_through_pooled_connection_authenticates_once() {
    let factory = MockFactory::new();
    let pool = new_pool(&factory, 1, 1).await;

    for text in ["show version", "show clock", "show ip"] {
        let mut connection = pool.acquire().await.unwrap();
        let response = connection.send(&MockRequest::new(text)).await;
        assert!(response.is_success());
        pool.release(connection).await.unwrap();
    }

    assert_eq!(factory.counters.created(), 1);
    assert_eq!(factory.counters.authenticated.load(std::sync::atomic::Ordering::SeqCst), 1);
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_closes_every_connection_exactly_once() {
    let factory = MockFactory::new();
    let pool = ConnectionPool::new(
        factory.as_factory(),
        unique_endpoint(),
        pool_config(2, 4).warm_up(true),
    )
    .await;

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let c = pool.acquire().await.unwrap();
    pool.release(a).await.unwrap();

    pool.close().await;
    pool.close().await;

    assert_eq!(pool.release(b).await.unwrap_err(), PoolError::Closed);
    assert_eq!(pool.release(c).await.unwrap_err(), PoolError::Closed);
    assert_eq!(pool.acquire().await.unwrap_err(), PoolError::Closed);
    assert_eq!(pool.try_acquire().await.unwrap_err(), PoolError::Closed);

    let counts = factory.counters.close_counts();
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&n| n == 1), "double close: {:?}", counts);
    assert_eq!(pool.stats().await.total_closed, 3);
}

#[tokio::test]
async fn test_close_wakes_blocked_acquire() {
    let factory = MockFactory::new();
    let pool = Arc::new(new_pool(&factory, 1, 1).await);
    let held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.close().await;
    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter was not woken")
        .unwrap();
    assert_eq!(result.unwrap_err(), PoolError::Closed);
    assert_eq!(pool.release(held).await.unwrap_err(), PoolError::Closed);
}

// =============================================================================
// Eviction and replenish
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reaper_evicts_and_replenishes() {
    let factory = MockFactory::new();
    let config = pool_config(3, 3)
        .min_idle(1)
        .idle_timeout(Duration::from_secs(30));
    let pool = Arc::new(ConnectionPool::new(factory.as_factory(), unique_endpoint(), config).await);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    pool.release(a).await.unwrap();
    pool.release(b).await.unwrap();
    assert_eq!(pool.stats().await.idle, 2);

    let reaper = pool.spawn_reaper(Duration::from_secs(10));
    tokio::time::sleep(Duration::from_secs(35)).await;

    // Both aged out; the floor of one idle connection was restored
    let stats = pool.stats().await;
    assert_eq!(stats.idle, 1);
    assert_eq!(factory.counters.created(), 3);
    assert_eq!(factory.counters.closed(), 2);

    pool.close().await;
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(reaper.is_finished());
}
