use autox_cache::{CacheConfig, SqliteCache};
use autox_core::models::{PageType, Query};
use autox_core::traits::ResponseCache;
use serde_json::json;

use crate::common::setup_test_cache;

#[tokio::test]
async fn set_and_get_entry() {
    let (cache, _dir) = setup_test_cache(true).await;
    let query = Query::new("http://example.com", PageType::Article);
    let key = cache.fingerprint(&query);

    assert_eq!(cache.get(&key).await.unwrap(), None);

    let payload = json!({"article": {"url": "http://example.com", "headline": "Hello"}});
    cache.set(&key, &payload).await.unwrap();

    assert_eq!(cache.get(&key).await.unwrap(), Some(payload));
    assert_eq!(cache.len().await.unwrap(), 1);
}

#[tokio::test]
async fn set_overwrites_existing_entry() {
    let (cache, _dir) = setup_test_cache(false).await;
    cache.set("k", &json!({"v": 1})).await.unwrap();
    cache.set("k", &json!({"v": 2})).await.unwrap();

    assert_eq!(cache.get("k").await.unwrap(), Some(json!({"v": 2})));
    assert_eq!(cache.len().await.unwrap(), 1);
}

#[tokio::test]
async fn fingerprint_ignores_field_order() {
    let (cache, _dir) = setup_test_cache(true).await;
    let a = Query::new("http://example.com", PageType::Product)
        .with_extra("fullHtml", json!(true))
        .with_extra("meta", json!({"b": 1, "a": 2}));
    let b = Query::new("http://example.com", PageType::Product)
        .with_extra("meta", json!({"a": 2, "b": 1}))
        .with_extra("fullHtml", json!(true));

    cache
        .set(&cache.fingerprint(&a), &json!({"product": {}}))
        .await
        .unwrap();
    assert_eq!(
        cache.get(&cache.fingerprint(&b)).await.unwrap(),
        Some(json!({"product": {}}))
    );
}

#[tokio::test]
async fn entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");

    let cache = SqliteCache::open_path(&path, true).await.unwrap();
    cache.set("k", &json!({"article": {}})).await.unwrap();
    cache.close().await.unwrap();

    let reopened = SqliteCache::open_path(&path, true).await.unwrap();
    assert_eq!(reopened.get("k").await.unwrap(), Some(json!({"article": {}})));
}

#[tokio::test]
async fn compression_setting_selects_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");

    let compressed = SqliteCache::open_path(&path, true).await.unwrap();
    compressed.set("k", &json!({"gz": true})).await.unwrap();
    compressed.close().await.unwrap();

    // The same file opened uncompressed does not see gzip entries.
    let plain = SqliteCache::open_path(&path, false).await.unwrap();
    assert_eq!(plain.get("k").await.unwrap(), None);
    plain.set("k", &json!({"gz": false})).await.unwrap();
    plain.close().await.unwrap();

    let compressed = SqliteCache::open_path(&path, true).await.unwrap();
    assert_eq!(compressed.get("k").await.unwrap(), Some(json!({"gz": true})));
}

#[tokio::test]
async fn summary_reports_path_and_count() {
    let (cache, dir) = setup_test_cache(true).await;
    cache.set("a", &json!({})).await.unwrap();
    cache.set("b", &json!({})).await.unwrap();

    let summary = cache.summary().await.unwrap();
    assert_eq!(
        summary,
        format!(
            "SqliteCache <{} | compressed: true | 2 records>",
            dir.path().join("cache.sqlite").display()
        )
    );
}

#[tokio::test]
async fn close_is_idempotent() {
    let (cache, _dir) = setup_test_cache(true).await;
    cache.close().await.unwrap();
    cache.close().await.unwrap();
    assert!(cache.get("k").await.is_err());
}

#[tokio::test]
async fn open_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path().join("nested/deeper/cache.sqlite"));

    let cache = SqliteCache::open(&config).await.unwrap();
    assert!(cache.is_compressed());
    assert!(cache.is_empty().await.unwrap());
    assert!(dir.path().join("nested/deeper/cache.sqlite").exists());
}
