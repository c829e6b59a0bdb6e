//! Pool capacity, FIFO wakeup, timeout, and shutdown semantics.

mod common;

use activecypher::{Driver, DriverConfig, Error};
use common::MockServer;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

fn small_pool_config(max: usize) -> DriverConfig {
    DriverConfig {
        max_pool_size: max,
        ..DriverConfig::default()
    }
}

#[tokio::test]
async fn capacity_is_bounded_and_waiters_are_served_on_release() {
    let server = MockServer::start().await;
    let mut config = small_pool_config(2);
    config.acquire_timeout = Duration::from_millis(50);
    let driver = Driver::from_url_with(&server.url(), config).unwrap();

    let s1 = driver.session().await.unwrap();
    let s2 = driver.session().await.unwrap();

    let stats = driver.stats();
    assert_eq!(stats.in_use, 2);
    assert_eq!(stats.max, 2);
    assert!(stats.idle + stats.in_use <= stats.max);

    // Third acquire times out while both connections are held.
    assert!(matches!(
        driver.session().await,
        Err(Error::PoolTimeout { .. })
    ));

    drop(s1);
    // A release makes the next acquire succeed promptly.
    let waited = Instant::now();
    let s3 = driver.session().await.unwrap();
    assert!(waited.elapsed() < Duration::from_secs(1));

    drop(s2);
    drop(s3);
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_pool_times_out_with_pool_timeout() {
    let server = MockServer::start().await;
    let mut config = small_pool_config(2);
    config.acquire_timeout = Duration::from_millis(50);
    let driver = Driver::from_url_with(&server.url(), config).unwrap();

    let _s1 = driver.session().await.unwrap();
    let _s2 = driver.session().await.unwrap();

    let started = Instant::now();
    match driver.session().await {
        Err(Error::PoolTimeout { waited }) => {
            assert!(waited >= Duration::from_millis(40));
            assert!(started.elapsed() < Duration::from_secs(2));
        }
        other => panic!("expected PoolTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn sequential_sessions_reuse_one_connection() {
    let server = MockServer::start().await;
    let driver = Driver::from_url(&server.url()).unwrap();

    for _ in 0..5 {
        let mut session = driver.session().await.unwrap();
        let stream = session
            .run("RETURN 1", activecypher::ValueMap::new())
            .await
            .unwrap();
        stream.consume().await.unwrap();
        drop(session);
        // Release is synchronous for a clean connection; no reset task to
        // wait on.
    }
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_idle_connections_are_probed_before_reuse() {
    let server = MockServer::start().await;
    let mut config = small_pool_config(4);
    config.idle_ttl = Duration::from_millis(0);
    let driver = Driver::from_url_with(&server.url(), config).unwrap();

    let session = driver.session().await.unwrap();
    drop(session);
    tokio::time::sleep(Duration::from_millis(10)).await;

    // TTL expired: acquire must probe (RETURN 1) and still reuse the same
    // socket rather than dialing a new one.
    let session = driver.session().await.unwrap();
    drop(session);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closed_pool_rejects_new_acquisitions() {
    let server = MockServer::start().await;
    let driver = Driver::from_url(&server.url()).unwrap();

    let session = driver.session().await.unwrap();
    drop(session);

    driver.close().await;
    assert!(matches!(driver.session().await, Err(Error::PoolClosed)));
}

#[tokio::test]
async fn waiters_observe_pool_close() {
    let server = MockServer::start().await;
    let mut config = small_pool_config(1);
    config.acquire_timeout = Duration::from_secs(5);
    let driver = Driver::from_url_with(&server.url(), config).unwrap();

    let held = driver.session().await.unwrap();
    let waiter = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.session().await.err() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let closer = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.close().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    let result = waiter.await.unwrap();
    assert!(matches!(result, Some(Error::PoolClosed)));
    closer.await.unwrap();
}
