//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 后端存储加载器
//!
//! 定义缓存未命中时回源加载的接口，以及一个基于内存的实现

use crate::context::Context;
use crate::error::BoxError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, instrument};

/// 加载器trait
///
/// 由外部存储层提供。返回 `Ok(None)` 表示记录不存在，
/// 返回 `Err` 表示存储本身出错。
#[async_trait]
pub trait Loader: Send + Sync {
    /// 资源ID
    type Id: Display + Debug + Send + Sync;
    /// 加载得到的值
    type Value: Clone + Send + Sync + 'static;

    /// 根据ID从存储加载数据
    ///
    /// # 参数
    ///
    /// * `ctx` - 请求上下文，实现可据此提前放弃
    /// * `id` - 资源ID
    async fn load(
        &self,
        ctx: &Context,
        id: &Self::Id,
    ) -> std::result::Result<Option<Self::Value>, BoxError>;
}

/// 基于内存的加载器
///
/// 记录加载次数，并允许为指定ID注入失败，便于演示和测试读穿行为
#[derive(Debug)]
pub struct MemoryLoader<I, V>
where
    I: Eq + Hash,
{
    records: DashMap<I, V>,
    failures: DashMap<I, String>,
    loads: AtomicUsize,
}

impl<I, V> MemoryLoader<I, V>
where
    I: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            failures: DashMap::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// 插入或覆盖一条记录
    pub fn insert(&self, id: I, value: V) {
        self.records.insert(id, value);
    }

    /// 删除一条记录，返回被删除的值
    pub fn remove(&self, id: &I) -> Option<V> {
        self.records.remove(id).map(|(_, v)| v)
    }

    /// 让指定ID的加载返回错误
    pub fn fail_with(&self, id: I, message: impl Into<String>) {
        self.failures.insert(id, message.into());
    }

    /// 取消注入的失败
    pub fn clear_failure(&self, id: &I) {
        self.failures.remove(id);
    }

    /// 累计加载次数
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl<I, V> Default for MemoryLoader<I, V>
where
    I: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I, V> Loader for MemoryLoader<I, V>
where
    I: Eq + Hash + Clone + Display + Debug + Send + Sync,
    V: Clone + Debug + Send + Sync + 'static,
{
    type Id = I;
    type Value = V;

    #[instrument(skip(self, ctx), level = "debug")]
    async fn load(&self, ctx: &Context, id: &I) -> std::result::Result<Option<V>, BoxError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if ctx.is_cancelled() {
            return Err("load abandoned: context cancelled".into());
        }
        if let Some(message) = self.failures.get(id) {
            debug!("memory loader injected failure for id {}", id);
            return Err(message.value().clone().into());
        }
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }
}
