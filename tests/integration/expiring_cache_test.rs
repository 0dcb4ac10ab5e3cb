//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 过期缓存集成测试

use oxflow::{ExpiringCache, ManualClock, Metrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

#[path = "../common/mod.rs"]
mod common;

use common::setup_logging;

/// 测试基本的设置与读取
#[tokio::test]
async fn test_set_then_get_within_ttl() {
    setup_logging();
    let cache: ExpiringCache<String, String> =
        ExpiringCache::new("basic", Duration::from_secs(3600));

    assert_eq!(cache.get(&"user:1".to_string()).await, None);
    cache.set("user:1".to_string(), "alice".to_string()).await;
    assert_eq!(
        cache.get(&"user:1".to_string()).await,
        Some("alice".to_string())
    );
    assert_eq!(cache.len().await, 1);
}

/// 测试TTL过期后读取未命中
///
/// 使用暂停的tokio时钟，系统时钟随之推进
#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
    setup_logging();
    let cache: ExpiringCache<String, u32> = ExpiringCache::new("ttl", Duration::from_secs(1));
    cache.set("k".to_string(), 7).await;

    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(cache.get(&"k".to_string()).await, Some(7));

    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(cache.get(&"k".to_string()).await, None);
    assert!(cache.is_empty().await);
}

/// 测试失效与清空
#[tokio::test]
async fn test_invalidate_and_clear() {
    let cache: ExpiringCache<String, u32> = ExpiringCache::new("inv", Duration::from_secs(60));
    cache.set("a".to_string(), 1).await;
    cache.set("b".to_string(), 2).await;

    assert!(cache.invalidate(&"a".to_string()).await);
    assert!(!cache.invalidate(&"a".to_string()).await);
    assert_eq!(cache.get(&"b".to_string()).await, Some(2));

    cache.clear().await;
    assert!(cache.is_empty().await);
}

/// 测试后台清理任务移除过期条目并随关闭信号退出
#[tokio::test(start_paused = true)]
async fn test_sweeper_purges_and_stops() {
    setup_logging();
    let cache: Arc<ExpiringCache<String, u32>> =
        Arc::new(ExpiringCache::new("sweep", Duration::from_secs(2)));
    cache.set("stale".to_string(), 1).await;

    let shutdown = CancellationToken::new();
    let handle = cache.spawn_sweeper(Duration::from_secs(1), shutdown.clone());

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(cache.len().await, 0);

    shutdown.cancel();
    handle.await.unwrap();
}

/// 测试并发读写
///
/// 多个读者和写者同时访问同一组键，读到的值要么不存在，要么是某个写者写入的完整值
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_and_writers() {
    setup_logging();
    let cache: Arc<ExpiringCache<String, (u32, u32)>> =
        Arc::new(ExpiringCache::new("concurrent", Duration::from_secs(60)));
    let writers = 4u32;
    let readers = 8u32;
    let barrier = Arc::new(Barrier::new((writers + readers) as usize));
    let mut handles = Vec::new();

    for w in 0..writers {
        let cache = cache.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..200u32 {
                cache.set(format!("key:{}", i % 16), (w, i)).await;
            }
        }));
    }
    for _ in 0..readers {
        let cache = cache.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..200u32 {
                if let Some((w, n)) = cache.get(&format!("key:{}", i % 16)).await {
                    assert!(w < writers);
                    assert_eq!(n % 16, i % 16);
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(cache.len().await, 16);
}

/// 测试缓存指标
#[tokio::test]
async fn test_cache_records_hits_and_misses() {
    let metrics = Arc::new(Metrics::new());
    let clock = Arc::new(ManualClock::new());
    let cache: ExpiringCache<String, u32> = ExpiringCache::new("metered", Duration::from_secs(5))
        .with_clock(clock.clone())
        .with_metrics(metrics.clone());

    cache.set("k".to_string(), 1).await;
    cache.get(&"k".to_string()).await;
    cache.get(&"missing".to_string()).await;
    clock.advance(Duration::from_secs(5));
    cache.get(&"k".to_string()).await;

    assert_eq!(metrics.request_count("metered", "cache", "get", "hit"), 1);
    assert_eq!(metrics.request_count("metered", "cache", "get", "miss"), 1);
    assert_eq!(metrics.request_count("metered", "cache", "get", "expired"), 1);
    assert_eq!(metrics.gauge("metered", "entries"), Some(0));
}
