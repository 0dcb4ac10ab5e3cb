//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内过期缓存，条目在固定TTL后失效。

use crate::clock::{deadline_after, Clock, SystemClock};
use crate::metrics::Metrics;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const LAYER: &str = "cache";

/// 缓存条目，只在缓存内部持有
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// 过期缓存
///
/// 单个 `HashMap` 由读写锁保护：读操作可以并发，写操作互斥。
/// 过期条目在读取时惰性淘汰，也可以通过 [`ExpiringCache::spawn_sweeper`] 定期清理。
/// 缓存操作从不失败，未命中是正常结果。
pub struct ExpiringCache<K, V> {
    /// 缓存名称
    name: String,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    /// 创建新的过期缓存，使用系统时钟
    ///
    /// # 参数
    ///
    /// * `name` - 缓存名称，用于日志和指标
    /// * `ttl` - 条目存活时间
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// 替换时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 注入共享的指标收集器
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 获取缓存值
    ///
    /// 仅当条目存在且过期时间严格晚于当前时间时命中。
    /// 读到已过期条目时将其移除并按未命中处理。
    #[instrument(skip(self), level = "debug", fields(cache = %self.name))]
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => {
                    debug!("cache get: key={:?}, found=true", key);
                    self.metrics.record_request(&self.name, LAYER, "get", "hit");
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    debug!("cache get: key={:?}, found=false", key);
                    self.metrics.record_request(&self.name, LAYER, "get", "miss");
                    return None;
                }
            }
        }

        self.evict_if_expired(key, now).await
    }

    /// 读锁下发现过期后的写锁路径
    ///
    /// 释放读锁后，其他写者可能已经刷新或移除了该键，只移除在 `now` 时仍然过期的条目
    async fn evict_if_expired(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = self.entries.write().await;
        match entries.get(key).map(|entry| entry.is_live(now)) {
            Some(true) => {
                debug!("cache get: key={:?}, refreshed concurrently", key);
                self.metrics.record_request(&self.name, LAYER, "get", "hit");
                return entries.get(key).map(|entry| entry.value.clone());
            }
            Some(false) => {
                entries.remove(key);
                debug!("cache get: key={:?}, expired=true, removed", key);
                self.metrics
                    .set_gauge(&self.name, "entries", entries.len() as i64);
                self.metrics.record_request(&self.name, LAYER, "get", "expired");
            }
            None => {
                self.metrics.record_request(&self.name, LAYER, "get", "miss");
            }
        }
        None
    }

    /// 设置缓存值，过期时间为当前时间加TTL
    #[instrument(skip(self, value), level = "debug", fields(cache = %self.name))]
    pub async fn set(&self, key: K, value: V) {
        let expires_at = deadline_after(self.clock.now(), self.ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key, CacheEntry { value, expires_at });
        self.metrics.record_request(&self.name, LAYER, "set", "success");
        self.metrics
            .set_gauge(&self.name, "entries", entries.len() as i64);
    }

    /// 使单个键失效，返回该键是否存在
    #[instrument(skip(self), level = "debug", fields(cache = %self.name))]
    pub async fn invalidate(&self, key: &K) -> bool {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(key).is_some();
        debug!("cache invalidate: key={:?}, removed={}", key, removed);
        self.metrics
            .set_gauge(&self.name, "entries", entries.len() as i64);
        removed
    }

    /// 清空缓存
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.metrics.set_gauge(&self.name, "entries", 0);
        debug!("cache {} cleared", self.name);
    }

    /// 当前存储的条目数，包括尚未被淘汰的过期条目
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 移除所有已过期条目，返回移除数量
    #[instrument(skip(self), level = "debug", fields(cache = %self.name))]
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("cache {} purged {} expired entries", self.name, purged);
        }
        self.metrics
            .set_gauge(&self.name, "entries", entries.len() as i64);
        purged
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// 启动后台清理任务
    ///
    /// 每隔 `interval` 调用一次 [`ExpiringCache::purge_expired`]，直到 `shutdown` 被取消
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("cache {} sweeper started, interval={:?}", cache.name, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("cache {} sweeper stopped", cache.name);
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.purge_expired().await;
                    }
                }
            }
        })
    }
}
