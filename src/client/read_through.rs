//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了读穿服务：先查过期缓存，未命中时回源加载并回填缓存。

use super::loader::Loader;
use crate::backend::expiring::ExpiringCache;
use crate::config::ReadThroughConfig;
use crate::context::Context;
use crate::error::{BoxError, CoreError, Result};
use crate::metrics::Metrics;
use crate::utils::cache_key;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const LAYER: &str = "read_through";
const FETCH_OPERATION: &str = "fetch";

/// 读穿服务
///
/// 缓存检查、回源加载和回填不是一个原子事务：默认情况下，
/// 同一个键的并发未命中可能各自调用加载器。启用 `single_flight` 后，
/// 同一个键同一时刻只有一个加载在进行，等待者拿到门后重新检查缓存。
pub struct ReadThroughService<L: Loader> {
    /// 服务名称
    name: String,
    cache: Arc<ExpiringCache<String, L::Value>>,
    loader: Arc<L>,
    config: ReadThroughConfig,
    /// 进行中的加载，仅在 single_flight 启用时使用
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    metrics: Arc<Metrics>,
}

impl<L: Loader> ReadThroughService<L> {
    /// 创建新的读穿服务
    ///
    /// # 参数
    ///
    /// * `name` - 服务名称
    /// * `cache` - 共享的过期缓存，必须在首次使用前由调用方创建
    /// * `loader` - 后端加载器
    /// * `config` - 读穿配置
    /// * `metrics` - 指标收集器
    pub fn new(
        name: impl Into<String>,
        cache: Arc<ExpiringCache<String, L::Value>>,
        loader: Arc<L>,
        config: ReadThroughConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let name = name.into();
        info!(
            "read-through service {} created: prefix={}, single_flight={}, load_timeout={:?}",
            name,
            config.key_prefix,
            config.single_flight,
            config.load_timeout()
        );
        Self {
            name,
            cache,
            loader,
            config,
            in_flight: DashMap::new(),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &Arc<ExpiringCache<String, L::Value>> {
        &self.cache
    }

    pub fn loader(&self) -> &Arc<L> {
        &self.loader
    }

    /// 资源ID对应的缓存键
    pub fn cache_key(&self, id: &L::Id) -> String {
        cache_key(&self.config.key_prefix, id)
    }

    /// 读取资源
    ///
    /// 命中时直接返回，不触碰加载器。未命中时回源：
    /// 记录不存在返回 [`CoreError::NotFound`]，加载失败返回带上下文的
    /// [`CoreError::Load`]，两者都不写缓存；成功时先写缓存再返回。
    #[instrument(skip(self, ctx), level = "debug", fields(service = %self.name))]
    pub async fn fetch(&self, ctx: &Context, id: &L::Id) -> Result<L::Value> {
        let key = self.cache_key(id);
        if let Some(value) = self.cache.get(&key).await {
            self.metrics
                .record_request(&self.name, LAYER, FETCH_OPERATION, "hit");
            return Ok(value);
        }
        self.metrics
            .record_request(&self.name, LAYER, FETCH_OPERATION, "miss");

        if self.config.single_flight {
            self.fetch_single_flight(ctx, id, key).await
        } else {
            self.load_and_store(ctx, id, key).await
        }
    }

    /// 使资源对应的缓存失效
    pub async fn invalidate(&self, id: &L::Id) -> bool {
        let key = self.cache_key(id);
        self.cache.invalidate(&key).await
    }

    async fn fetch_single_flight(&self, ctx: &Context, id: &L::Id, key: String) -> Result<L::Value> {
        let gate = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _permit = gate.lock().await;
            // 等待期间前一个持有者可能已经完成回填
            match self.cache.get(&key).await {
                Some(value) => {
                    self.metrics
                        .record_request(&self.name, LAYER, FETCH_OPERATION, "shared");
                    Ok(value)
                }
                None => self.load_and_store(ctx, id, key.clone()).await,
            }
        };

        // 只有映射和自己持有门时才移除，仍有等待者则留给最后一个
        self.in_flight
            .remove_if(&key, |_, current| {
                Arc::ptr_eq(current, &gate) && Arc::strong_count(current) <= 2
            });
        result
    }

    async fn load_and_store(&self, ctx: &Context, id: &L::Id, key: String) -> Result<L::Value> {
        let start = std::time::Instant::now();
        let outcome = self.load_from_source(ctx, id).await;
        self.metrics.record_duration(
            &self.name,
            LAYER,
            "load",
            start.elapsed().as_secs_f64(),
        );

        match outcome {
            Ok(Some(value)) => {
                self.cache.set(key, value.clone()).await;
                self.metrics
                    .record_request(&self.name, LAYER, "load", "success");
                debug!("loaded {} from source and cached it", id);
                Ok(value)
            }
            Ok(None) => {
                self.metrics
                    .record_request(&self.name, LAYER, "load", "not_found");
                debug!("{} not found in source", id);
                Err(CoreError::NotFound(key))
            }
            Err(e) => {
                self.metrics
                    .record_request(&self.name, LAYER, "load", "failure");
                warn!("failed to load {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// 调用加载器，受上下文和单次回源超时约束
    async fn load_from_source(&self, ctx: &Context, id: &L::Id) -> Result<Option<L::Value>> {
        let load = async {
            match self.config.load_timeout() {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.loader.load(ctx, id)).await {
                        Ok(result) => result,
                        Err(_) => Err(Box::new(CoreError::Timeout(format!(
                            "load exceeded {}ms",
                            limit.as_millis()
                        ))) as BoxError),
                    }
                }
                None => self.loader.load(ctx, id).await,
            }
        };

        tokio::select! {
            biased;
            reason = ctx.done() => Err(reason),
            result = load => result.map_err(|source| CoreError::Load {
                operation: FETCH_OPERATION,
                id: id.to_string(),
                source,
            }),
        }
    }
}
