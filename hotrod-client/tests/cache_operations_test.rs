//! End-to-end cache operations against the mock server.

mod common;

use bytes::Bytes;
use common::{config_for, MockServer};
use hotrod_client::core::protocol::{Flags, GET_REQUEST, PING_REQUEST, PUT_IF_ABSENT_REQUEST};
use hotrod_client::RemoteCacheManager;

#[tokio::test]
async fn test_put_then_put_if_absent_keeps_first_value() {
    let server = MockServer::start().await;
    let manager = RemoteCacheManager::start(config_for(&[server.addr()]).build().unwrap())
        .await
        .unwrap();
    let cache = manager
        .cache("books")
        .await
        .unwrap()
        .with_flags(Flags::FORCE_RETURN_VALUE);

    let put = cache.put("k", "v1").await.unwrap();
    assert!(put.is_success());
    assert!(put.previous().is_none());

    let absent = cache.put_if_absent("k", "v2").await.unwrap();
    assert!(absent.is_not_executed());
    assert_eq!(absent.previous(), Some(&Bytes::from_static(b"v1")));

    assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from_static(b"v1")));
    assert_eq!(server.request_count(PUT_IF_ABSENT_REQUEST), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_put_if_absent_twice_reports_previous_only_second_time() {
    let server = MockServer::start().await;
    let manager = RemoteCacheManager::start(config_for(&[server.addr()]).build().unwrap())
        .await
        .unwrap();
    let cache = manager
        .cache("books")
        .await
        .unwrap()
        .with_flags(Flags::FORCE_RETURN_VALUE);

    let first = cache.put_if_absent("k", "v").await.unwrap();
    assert!(first.is_success());
    assert!(first.previous().is_none());

    let second = cache.put_if_absent("k", "v").await.unwrap();
    assert!(!second.is_success());
    assert_eq!(second.previous(), Some(&Bytes::from_static(b"v")));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_get_missing_key_twice_has_no_side_effects() {
    let server = MockServer::start().await;
    let manager = RemoteCacheManager::start(config_for(&[server.addr()]).build().unwrap())
        .await
        .unwrap();
    let cache = manager.cache("books").await.unwrap();

    assert_eq!(cache.get("missing").await.unwrap(), None);
    assert_eq!(cache.get("missing").await.unwrap(), None);
    assert_eq!(cache.size().await.unwrap(), 0);
    assert_eq!(server.request_count(GET_REQUEST), 2);
    assert_eq!(manager.statistics().remote_misses, 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_replace_remove_and_contains() {
    let server = MockServer::start().await;
    let manager = RemoteCacheManager::start(config_for(&[server.addr()]).build().unwrap())
        .await
        .unwrap();
    let cache = manager.cache("books").await.unwrap();

    assert!(!cache.replace("k", "v0").await.unwrap().is_success());
    cache.put("k", "v1").await.unwrap();
    assert!(cache.replace("k", "v2").await.unwrap().is_success());
    assert!(cache.contains_key("k").await.unwrap());

    let removed = cache.remove("k").await.unwrap();
    assert!(removed.is_success());
    assert!(!cache.contains_key("k").await.unwrap());
    assert!(cache.remove("k").await.unwrap().is_not_exist());
    manager.shutdown().await;
}

#[tokio::test]
async fn test_clear_size_stats_and_exec() {
    let server = MockServer::start().await;
    let manager = RemoteCacheManager::start(config_for(&[server.addr()]).build().unwrap())
        .await
        .unwrap();
    let cache = manager.cache("books").await.unwrap();

    cache.put("a", "1").await.unwrap();
    cache.put("b", "2").await.unwrap();
    assert_eq!(cache.size().await.unwrap(), 2);
    assert_eq!(
        cache.server_statistics().await.unwrap().get("currentNumberOfEntries").map(String::as_str),
        Some("2")
    );

    cache.clear().await.unwrap();
    assert!(cache.is_empty().await.unwrap());

    let echoed = cache.execute("word-count", Default::default()).await.unwrap();
    assert_eq!(echoed.as_ref(), b"word-count");
    manager.shutdown().await;
}

#[tokio::test]
async fn test_start_pings_every_server() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let manager = RemoteCacheManager::start(
        config_for(&[first.addr(), second.addr()]).build().unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(first.request_count(PING_REQUEST), 1);
    assert_eq!(second.request_count(PING_REQUEST), 1);
    assert_eq!(manager.channel_count(), 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_async_handles_complete_independently() {
    let server = MockServer::start().await;
    let manager = RemoteCacheManager::start(config_for(&[server.addr()]).build().unwrap())
        .await
        .unwrap();
    let cache = manager.cache("books").await.unwrap();

    let puts: Vec<_> = (0..10)
        .map(|i| cache.put_async(format!("k{i}"), format!("v{i}")))
        .collect();
    for put in puts {
        assert!(put.await.unwrap().is_success());
    }
    let value = cache.get_async("k7").await.unwrap();
    assert_eq!(value, Some(Bytes::from("v7")));
    manager.shutdown().await;
}
