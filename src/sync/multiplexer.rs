//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了事件多路复用器：在多个事件源、取消信号和空闲超时之间仲裁。

use crate::clock::deadline_after;
use crate::config::{HandlerErrorPolicy, MultiplexerConfig};
use crate::error::{BoxError, CoreError, Result};
use crate::metrics::Metrics;
use futures::stream::{self, BoxStream, SelectAll};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

const LAYER: &str = "multiplexer";

/// 多路复用器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerState {
    /// 等待任一事件源、取消或超时
    Waiting,
    /// 正在同步调用处理器
    Dispatching,
    Cancelled,
    TimedOut,
    /// 循环已结束
    Exited,
}

/// 循环结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// 取消信号触发
    Cancelled,
    /// 空闲超时
    TimedOut,
    /// 所有事件源都已关闭
    Exhausted,
    /// 处理器失败且策略为 Abort
    Aborted { source: String, error: String },
}

/// 一次激活的运行报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexReport {
    pub reason: ExitReason,
    /// 成功调用处理器的次数
    pub dispatched: u64,
    /// 处理器失败次数
    pub handler_failures: u64,
}

/// 命名事件源
///
/// 多路复用器只读取事件源，不管理其生命周期。事件源关闭后不再参与仲裁。
pub struct EventSource<T> {
    name: String,
    events: BoxStream<'static, T>,
}

impl<T: Send + 'static> EventSource<T> {
    /// 由任意流构造
    pub fn from_stream<S>(name: impl Into<String>, events: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            name: name.into(),
            events: events.boxed(),
        }
    }

    /// 由通道接收端构造，所有发送端关闭后事件源结束
    pub fn from_receiver(name: impl Into<String>, receiver: mpsc::Receiver<T>) -> Self {
        let events = stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        });
        Self::from_stream(name, events)
    }

    /// 由无界通道接收端构造
    pub fn from_unbounded(name: impl Into<String>, receiver: mpsc::UnboundedReceiver<T>) -> Self {
        let events = stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        });
        Self::from_stream(name, events)
    }

    /// 由单个 future 构造，恰好产生一次事件
    pub fn once<F>(name: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::from_stream(name, stream::once(fut))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn tagged(self) -> BoxStream<'static, (Arc<str>, T)> {
        let name: Arc<str> = Arc::from(self.name);
        self.events
            .map(move |value| (Arc::clone(&name), value))
            .boxed()
    }
}

type Handler<T> = Box<dyn FnMut(T) -> std::result::Result<(), BoxError> + Send>;

/// 分发表：事件源名称到处理器的映射
pub struct DispatchTable<T> {
    handlers: HashMap<String, Handler<T>>,
}

impl<T> DispatchTable<T> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// 为事件源注册处理器，重复注册时覆盖
    pub fn on<F>(mut self, source: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(T) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.handlers.insert(source.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, source: &str) -> bool {
        self.handlers.contains_key(source)
    }
}

impl<T> Default for DispatchTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 事件多路复用器
///
/// 单线程协作式循环：每轮等待取消信号、任一事件源或空闲超时中最先就绪者。
/// 同时就绪时取消优先，其次是事件源，最后是超时。处理器在循环内同步执行，
/// 执行时间过长会推迟所有事件源。空闲超时在每次分发后重新计时。
pub struct EventMultiplexer {
    /// 多路复用器名称
    name: String,
    policy: HandlerErrorPolicy,
    state: watch::Sender<MultiplexerState>,
    metrics: Arc<Metrics>,
}

impl EventMultiplexer {
    pub fn new(name: impl Into<String>, policy: HandlerErrorPolicy, metrics: Arc<Metrics>) -> Self {
        let (state, _) = watch::channel(MultiplexerState::Waiting);
        Self {
            name: name.into(),
            policy,
            state,
            metrics,
        }
    }

    /// 按配置创建，同时返回配置中的空闲超时
    pub fn from_config(
        name: impl Into<String>,
        config: &MultiplexerConfig,
        metrics: Arc<Metrics>,
    ) -> (Self, Duration) {
        (
            Self::new(name, config.handler_error_policy, metrics),
            config.idle_timeout(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前状态
    pub fn state(&self) -> MultiplexerState {
        *self.state.borrow()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<MultiplexerState> {
        self.state.subscribe()
    }

    /// 启动一次激活，直到取消、超时、事件源耗尽或处理器致命失败
    ///
    /// # 参数
    ///
    /// * `sources` - 命名事件源
    /// * `cancel` - 取消信号
    /// * `idle_timeout` - 空闲超时
    /// * `dispatch` - 分发表，每个事件源都必须有处理器
    ///
    /// # 返回值
    ///
    /// 返回运行报告；事件源缺少处理器时返回配置错误
    pub async fn start<T: Send + 'static>(
        &self,
        sources: Vec<EventSource<T>>,
        cancel: CancellationToken,
        idle_timeout: Duration,
        mut dispatch: DispatchTable<T>,
    ) -> Result<MultiplexReport> {
        if let Some(orphan) = sources.iter().find(|s| !dispatch.contains(s.name())) {
            return Err(CoreError::ConfigError(format!(
                "multiplexer {}: no handler registered for source '{}'",
                self.name,
                orphan.name()
            )));
        }

        let activation = uuid::Uuid::new_v4().simple().to_string();
        let span = info_span!("multiplexer", name = %self.name, activation = %activation);
        let source_count = sources.len();
        let mut merged: SelectAll<BoxStream<'static, (Arc<str>, T)>> =
            stream::select_all(sources.into_iter().map(EventSource::tagged));

        async move {
            info!(
                "multiplexer started: sources={}, idle_timeout={:?}",
                source_count, idle_timeout
            );
            let mut dispatched = 0u64;
            let mut handler_failures = 0u64;
            let idle = tokio::time::sleep_until(idle_deadline(idle_timeout));
            tokio::pin!(idle);

            let reason = loop {
                self.transition(MultiplexerState::Waiting);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.transition(MultiplexerState::Cancelled);
                        break ExitReason::Cancelled;
                    }
                    next = merged.next() => {
                        let Some((source, value)) = next else {
                            info!("all event sources closed");
                            break ExitReason::Exhausted;
                        };
                        self.transition(MultiplexerState::Dispatching);
                        match self.dispatch(&mut dispatch, &source, value) {
                            Ok(()) => dispatched += 1,
                            Err(error) => {
                                handler_failures += 1;
                                if self.policy == HandlerErrorPolicy::Abort {
                                    warn!("handler for source {} failed, aborting: {}", source, error);
                                    break ExitReason::Aborted {
                                        source: source.to_string(),
                                        error: error.to_string(),
                                    };
                                }
                                warn!("handler for source {} failed: {}", source, error);
                            }
                        }
                        idle.as_mut().reset(idle_deadline(idle_timeout));
                    }
                    _ = &mut idle => {
                        self.transition(MultiplexerState::TimedOut);
                        break ExitReason::TimedOut;
                    }
                }
            };

            self.transition(MultiplexerState::Exited);
            self.metrics
                .record_request(&self.name, LAYER, "exit", exit_label(&reason));
            info!(
                "multiplexer exited: reason={:?}, dispatched={}, handler_failures={}",
                reason, dispatched, handler_failures
            );
            Ok(MultiplexReport {
                reason,
                dispatched,
                handler_failures,
            })
        }
        .instrument(span)
        .await
    }

    /// 同步调用处理器，panic 被转换为错误
    fn dispatch<T>(
        &self,
        table: &mut DispatchTable<T>,
        source: &str,
        value: T,
    ) -> std::result::Result<(), BoxError> {
        let Some(handler) = table.handlers.get_mut(source) else {
            return Err(format!("no handler for source '{}'", source).into());
        };
        debug!("dispatching event from source {}", source);
        let outcome = match catch_unwind(AssertUnwindSafe(|| handler(value))) {
            Ok(result) => result,
            Err(_) => Err(format!("handler for source '{}' panicked", source).into()),
        };
        let label = if outcome.is_ok() { "success" } else { "failure" };
        self.metrics.record_request(&self.name, LAYER, source, label);
        outcome
    }

    fn transition(&self, next: MultiplexerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("multiplexer {} state {:?} -> {:?}", self.name, previous, next);
        }
    }
}

/// 从当前时刻起算的空闲截止时间，超大超时不会溢出
fn idle_deadline(idle_timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    tokio::time::Instant::from_std(deadline_after(now.into_std(), idle_timeout))
}

fn exit_label(reason: &ExitReason) -> &'static str {
    match reason {
        ExitReason::Cancelled => "cancelled",
        ExitReason::TimedOut => "timed_out",
        ExitReason::Exhausted => "exhausted",
        ExitReason::Aborted { .. } => "aborted",
    }
}
