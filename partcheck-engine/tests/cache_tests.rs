//! Hybrid cache integration tests: fill-on-read, invalidation and sync

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use helpers::{create_test_db, hybrid_cache, FakeRemote};
use partcheck_engine::cache::{
    CacheConfig, CacheError, CacheKind, CachePayload, CacheTier, RemoteError, RenderStatus,
    SyncStatus,
};
use partcheck_engine::types::PartKey;
use tokio_util::sync::CancellationToken;

fn key(part: &str, color: i32) -> PartKey {
    PartKey::new(part, color)
}

#[tokio::test]
async fn test_remote_hit_fills_faster_tiers() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.insert_vectors(key("3001", 4), &[1.0, 0.0, 0.5]);
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    let first = cache.get(CacheKind::Vectors, &key("3001", 4)).await.unwrap().unwrap();
    assert_eq!(first.origin, CacheTier::Remote);
    assert_eq!(remote.vector_fetches.load(Ordering::SeqCst), 1);

    let second = cache.get(CacheKind::Vectors, &key("3001", 4)).await.unwrap().unwrap();
    assert_eq!(second.origin, CacheTier::Memory);
    assert_eq!(second.payload, first.payload);
    assert_eq!(remote.vector_fetches.load(Ordering::SeqCst), 1, "no second remote call");

    // Memory wiped: the local tier still answers
    cache.memory().clear().await;
    let third = cache.get(CacheKind::Vectors, &key("3001", 4)).await.unwrap().unwrap();
    assert_eq!(third.origin, CacheTier::Local);
    assert_eq!(remote.vector_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_miss_everywhere_is_none() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    assert!(cache.get_vectors(&key("9999", 0)).await.unwrap().is_none());
    assert_eq!(cache.memory().len().await, 0);
}

#[tokio::test]
async fn test_remote_failure_degrades_to_miss() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.insert_vectors(key("3001", 4), &[1.0, 0.0, 0.5]);
    remote.set_failing(true);
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    assert!(cache.get_vectors(&key("3001", 4)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_tier_evicts_oldest() {
    let (_dir, pool) = create_test_db().await;
    let config = CacheConfig {
        memory_capacity: 2,
        ..Default::default()
    };
    let cache = hybrid_cache(&pool, config, None);

    for part in ["3001", "3002", "3003"] {
        cache
            .put(key(part, 1), CachePayload::Asset(part.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    assert_eq!(cache.memory().len().await, 2);
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.memory_entries, 2);
    assert_eq!(stats.memory_capacity, 2);
    assert_eq!(stats.local_entries, 3);

    // Evicted from memory, still served by the local tier
    let entry = cache.get(CacheKind::Asset, &key("3001", 1)).await.unwrap().unwrap();
    assert_eq!(entry.origin, CacheTier::Local);
}

#[tokio::test]
async fn test_invalidate_glob_removes_from_all_tiers() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    for (part, color) in [("3001", 1), ("3001", 4), ("3002", 1)] {
        cache
            .put(key(part, color), CachePayload::Asset(vec![1, 2, 3]))
            .await
            .unwrap();
    }

    let report = cache.invalidate("3001_*").await.unwrap();
    assert_eq!(report.memory_removed, 2);
    assert_eq!(report.local_removed, 2);
    assert_eq!(remote.purged(), vec!["3001_".to_string()]);

    assert!(cache.get(CacheKind::Asset, &key("3001", 1)).await.unwrap().is_none());
    assert!(cache.get(CacheKind::Asset, &key("3002", 1)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalidate_exact_key() {
    let (_dir, pool) = create_test_db().await;
    let cache = hybrid_cache(&pool, CacheConfig::default(), None);
    cache.put(key("3001", 1), CachePayload::Asset(vec![1])).await.unwrap();
    cache.put(key("3001", 10), CachePayload::Asset(vec![2])).await.unwrap();

    let report = cache.invalidate("3001_1").await.unwrap();
    assert_eq!(report.memory_removed, 1);
    assert_eq!(report.local_removed, 1);
    assert!(cache.get(CacheKind::Asset, &key("3001", 10)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalidate_empty_pattern_rejected() {
    let (_dir, pool) = create_test_db().await;
    let cache = hybrid_cache(&pool, CacheConfig::default(), None);
    assert!(matches!(
        cache.invalidate("").await,
        Err(CacheError::InvalidPattern(_))
    ));
}

#[tokio::test]
async fn test_sync_downloads_then_is_noop() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.publish(key("3001", 4), "v1", &[1.0, 0.0, 0.5], Some(b"png-3001"));
    remote.publish(key("3002", 4), "v1", &[0.0, 1.0, 0.5], Some(b"png-3002"));
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));
    let cancel = CancellationToken::new();

    let report = cache.sync(&cancel).await.unwrap();
    assert_eq!(report.from_version, None);
    assert_eq!(report.to_version, "v1");
    assert_eq!(report.changes, 2);
    assert_eq!(report.downloads, 4);
    assert_eq!(report.ready, 2);
    assert_eq!(cache.sync_status().await, SyncStatus::UpToDate);
    assert_eq!(
        cache.local().render_status(&key("3001", 4)).await.unwrap(),
        Some(RenderStatus::Ready)
    );

    let downloads = remote.downloads();
    let again = cache.sync(&cancel).await.unwrap();
    assert_eq!(again.downloads, 0);
    assert_eq!(again.changes, 0);
    assert_eq!(remote.downloads(), downloads, "up-to-date sync fetches nothing");

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.local_version.as_deref(), Some("v1"));
    assert_eq!(stats.remote_version.as_deref(), Some("v1"));
    assert!(stats.last_sync.is_some());
}

#[tokio::test]
async fn test_incremental_sync_fetches_only_newer_changes() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.publish(key("3001", 4), "v1", &[1.0, 0.0, 0.5], None);
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));
    let cancel = CancellationToken::new();
    cache.sync(&cancel).await.unwrap();

    remote.publish(key("3003", 1), "v2", &[0.0, 0.0, 1.0], None);
    remote.set_version("v2");
    let report = cache.sync(&cancel).await.unwrap();

    assert_eq!(report.from_version.as_deref(), Some("v1"));
    assert_eq!(report.to_version, "v2");
    assert_eq!(report.changes, 1);
    assert_eq!(report.downloads, 1);
}

#[tokio::test]
async fn test_sync_pages_through_change_feed() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    for i in 0..5 {
        remote.publish(key(&format!("30{:02}", i), 1), "v1", &[1.0, 0.0, 0.5], None);
    }
    let config = CacheConfig {
        sync_batch_size: 2,
        download_concurrency: 2,
        ..Default::default()
    };
    let cache = hybrid_cache(&pool, config, Some(remote.clone()));

    let report = cache.sync(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.changes, 5);
    assert_eq!(report.not_rendered, 5);
    assert_eq!(cache.stats().await.unwrap().local_entries, 5);
}

#[tokio::test]
async fn test_missing_asset_marked_not_rendered() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.publish(key("3001", 4), "v1", &[1.0, 0.0, 0.5], None);
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    let report = cache.sync(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.not_rendered, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(
        cache.local().render_status(&key("3001", 4)).await.unwrap(),
        Some(RenderStatus::NotRendered)
    );
    // Vectors still stored
    assert!(cache.get_vectors(&key("3001", 4)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_digest_mismatch_discards_asset() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.publish_corrupt(key("3001", 4), "v1", &[1.0, 0.0, 0.5], b"truncated");
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    let report = cache.sync(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(
        cache.local().render_status(&key("3001", 4)).await.unwrap(),
        Some(RenderStatus::Error)
    );

    // Nothing was stored locally for the asset
    remote.set_failing(true);
    assert!(cache.get(CacheKind::Asset, &key("3001", 4)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_sync_keeps_old_version() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.publish(key("3001", 4), "v1", &[1.0, 0.0, 0.5], None);
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = cache.sync(&cancel).await;

    assert!(matches!(result, Err(CacheError::Cancelled)));
    assert_eq!(cache.sync_status().await, SyncStatus::Stale);
    assert!(cache.local().version().await.unwrap().is_none());
    assert_eq!(remote.change_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_second_page_keeps_old_version() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.publish(key("3001", 4), "v1", &[1.0, 0.0, 0.5], None);
    let config = CacheConfig {
        sync_batch_size: 2,
        ..Default::default()
    };
    let cache = hybrid_cache(&pool, config, Some(remote.clone()));
    let cancel = CancellationToken::new();
    cache.sync(&cancel).await.unwrap();

    for i in 0..4 {
        remote.publish(key(&format!("31{:02}", i), 1), "v2", &[0.0, 1.0, 0.5], None);
    }
    remote.set_version("v2");
    remote.fail_pages_from(1);
    let requests_before = remote.change_requests.load(Ordering::SeqCst);

    let result = cache.sync(&cancel).await;

    assert!(matches!(
        result,
        Err(CacheError::Remote(RemoteError::Timeout(_)))
    ));
    assert_eq!(remote.change_requests.load(Ordering::SeqCst) - requests_before, 2);
    let local_version = cache.local().version().await.unwrap().map(|v| v.version);
    assert_eq!(local_version.as_deref(), Some("v1"));
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.sync_status, SyncStatus::Failed);
    assert!(stats.last_error.is_some());
    // First page was applied before the failure, the second never arrived
    assert_eq!(
        cache.local().render_status(&key("3100", 1)).await.unwrap(),
        Some(RenderStatus::NotRendered)
    );
    assert_eq!(cache.local().render_status(&key("3102", 1)).await.unwrap(), None);
}

#[tokio::test]
async fn test_unreachable_remote_marks_failed() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.set_failing(true);
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));

    assert!(matches!(
        cache.sync(&CancellationToken::new()).await,
        Err(CacheError::Remote(_))
    ));
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.sync_status, SyncStatus::Failed);
    assert!(stats.last_error.is_some());
}

#[tokio::test]
async fn test_sync_without_remote() {
    let (_dir, pool) = create_test_db().await;
    let cache = hybrid_cache(&pool, CacheConfig::default(), None);
    assert!(matches!(
        cache.sync(&CancellationToken::new()).await,
        Err(CacheError::RemoteUnavailable)
    ));
}

#[tokio::test]
async fn test_clear_resets_version_and_entries() {
    let (_dir, pool) = create_test_db().await;
    let remote = Arc::new(FakeRemote::new("v1"));
    remote.publish(key("3001", 4), "v1", &[1.0, 0.0, 0.5], Some(b"png"));
    let cache = hybrid_cache(&pool, CacheConfig::default(), Some(remote.clone()));
    cache.sync(&CancellationToken::new()).await.unwrap();

    cache.clear().await.unwrap();
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.local_entries, 0);
    assert_eq!(stats.memory_entries, 0);
    assert_eq!(stats.local_version, None);
    assert_eq!(stats.sync_status, SyncStatus::Unknown);
}
