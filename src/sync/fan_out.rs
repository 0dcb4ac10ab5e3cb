//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了扇出执行器：并发运行一批相互独立的工作单元，并汇总失败。

use crate::config::{FanOutConfig, FailureOrder};
use crate::error::{BatchFailure, BoxError, TaskError};
use crate::metrics::Metrics;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, instrument, warn};

const LAYER: &str = "fan_out";

/// 工作单元
///
/// 执行器只关心单元的标识，用于失败报告
pub trait WorkUnit: Send + 'static {
    fn unit_id(&self) -> String;
}

macro_rules! impl_work_unit_via_display {
    ($($t:ty),*) => {
        $(
            impl WorkUnit for $t {
                fn unit_id(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_work_unit_via_display!(u8, u16, u32, u64, usize, i32, i64, String, &'static str);

/// 批次结果
///
/// 在所有单元结束后一次性生成，之后不再变化
#[derive(Debug)]
pub struct BatchOutcome {
    total: usize,
    failures: Vec<TaskError>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn failures(&self) -> &[TaskError] {
        &self.failures
    }

    pub fn succeeded(&self) -> usize {
        self.total - self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// 失败单元的标识列表
    pub fn failed_units(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.unit.as_str()).collect()
    }

    /// 转换为批次级结果：无失败时返回成功单元数，否则返回汇总失败
    pub fn into_result(self) -> std::result::Result<usize, BatchFailure> {
        if self.failures.is_empty() {
            Ok(self.total)
        } else {
            Err(BatchFailure {
                total: self.total,
                failures: self.failures,
            })
        }
    }
}

/// 单元完成报告，通过完成通道发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    /// 单元在输入中的位置
    pub index: usize,
    pub unit: String,
    /// 失败时的错误描述
    pub error: Option<String>,
}

impl UnitReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// 扇出执行器
///
/// 每个单元一个 tokio 任务。配置了 `max_concurrency` 时，
/// 同时运行的单元数不超过该值。单元失败或 panic 只被记录，不会中断其他单元；
/// `run` 在所有单元结束后才返回。
pub struct FanOutExecutor {
    /// 执行器名称
    name: String,
    config: FanOutConfig,
    metrics: Arc<Metrics>,
}

impl FanOutExecutor {
    pub fn new(name: impl Into<String>, config: FanOutConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            name: name.into(),
            config,
            metrics,
        }
    }

    /// 不限并发、按完成顺序汇总失败的执行器
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::new(name, FanOutConfig::default(), Arc::new(Metrics::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 运行一个批次
    ///
    /// # 参数
    ///
    /// * `units` - 工作单元
    /// * `worker` - 每个单元调用一次的处理函数
    ///
    /// # 返回值
    ///
    /// 返回批次结果，包含总数和逐项失败记录
    pub async fn run<U, F, Fut>(&self, units: Vec<U>, worker: F) -> BatchOutcome
    where
        U: WorkUnit,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.execute(units, worker, None).await
    }

    /// 运行一个批次，并把每个单元的完成情况发送到 `progress`
    ///
    /// 接收端关闭不影响批次执行
    pub async fn run_with_progress<U, F, Fut>(
        &self,
        units: Vec<U>,
        worker: F,
        progress: mpsc::UnboundedSender<UnitReport>,
    ) -> BatchOutcome
    where
        U: WorkUnit,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.execute(units, worker, Some(progress)).await
    }

    #[instrument(
        skip_all,
        level = "info",
        fields(executor = %self.name, total = units.len())
    )]
    async fn execute<U, F, Fut>(
        &self,
        units: Vec<U>,
        worker: F,
        progress: Option<mpsc::UnboundedSender<UnitReport>>,
    ) -> BatchOutcome
    where
        U: WorkUnit,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        let total = units.len();
        if total == 0 {
            debug!("fan-out {} received an empty batch", self.name);
            return BatchOutcome {
                total: 0,
                failures: Vec::new(),
            };
        }

        let limit = self.config.max_concurrency;
        info!(
            "fan-out {} starting batch: units={}, max_concurrency={}",
            self.name,
            total,
            if limit == 0 { "unbounded".to_string() } else { limit.to_string() }
        );
        let start = std::time::Instant::now();

        let worker = Arc::new(worker);
        let gate = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        let mut running = FuturesUnordered::new();

        for (index, unit) in units.into_iter().enumerate() {
            let unit_id = unit.unit_id();
            let worker = Arc::clone(&worker);
            let gate = gate.clone();
            let handle = tokio::spawn(async move {
                // 信号量从不关闭，acquire 不会失败
                let _permit = match gate {
                    Some(gate) => gate.acquire_owned().await.ok(),
                    None => None,
                };
                worker(unit).await
            });
            running.push(handle.map(move |joined| (index, unit_id, joined)));
        }

        // 失败汇总只在这个循环里串行追加
        let mut failures: Vec<(usize, TaskError)> = Vec::new();
        while let Some((index, unit_id, joined)) = running.next().await {
            let failure = match joined {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(TaskError {
                    unit: unit_id.clone(),
                    source,
                }),
                Err(e) if e.is_panic() => Some(TaskError::new(
                    unit_id.clone(),
                    format!("worker panicked: {}", panic_message(e.into_panic())),
                )),
                Err(e) => Some(TaskError::new(
                    unit_id.clone(),
                    format!("worker task aborted: {}", e),
                )),
            };

            let report = UnitReport {
                index,
                unit: unit_id,
                error: failure.as_ref().map(|f| f.source.to_string()),
            };
            match failure {
                Some(failure) => {
                    warn!("fan-out {}: {}", self.name, failure);
                    self.metrics
                        .record_request(&self.name, LAYER, "unit", "failure");
                    failures.push((index, failure));
                }
                None => {
                    debug!("fan-out {}: unit {} succeeded", self.name, report.unit);
                    self.metrics
                        .record_request(&self.name, LAYER, "unit", "success");
                }
            }
            if let Some(tx) = &progress {
                let _ = tx.send(report);
            }
        }

        if self.config.failure_order == FailureOrder::Input {
            failures.sort_by_key(|(index, _)| *index);
        }
        let failures: Vec<TaskError> = failures.into_iter().map(|(_, f)| f).collect();

        self.metrics.record_duration(
            &self.name,
            LAYER,
            "batch",
            start.elapsed().as_secs_f64(),
        );
        if failures.is_empty() {
            self.metrics
                .record_request(&self.name, LAYER, "batch", "success");
            info!("fan-out {} batch completed: {} units succeeded", self.name, total);
        } else {
            self.metrics
                .record_request(&self.name, LAYER, "batch", "failure");
            warn!(
                "fan-out {} batch completed with {} failures out of {} units",
                self.name,
                failures.len(),
                total
            );
        }

        BatchOutcome { total, failures }
    }
}

/// 提取 panic 负载中的文本
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
