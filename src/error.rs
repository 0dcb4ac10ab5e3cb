//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了核心组件的错误类型和处理机制。

use thiserror::Error;

/// 外部错误的统一装箱类型
///
/// 加载器和工作单元返回的底层错误都以此类型传递
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 核心错误类型枚举
///
/// 定义了读穿服务、扇出执行器和配置加载中可能发生的各种错误
#[derive(Error, Debug)]
pub enum CoreError {
    /// 请求的资源在后端存储中不存在
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 后端存储加载失败，携带操作名称和资源ID
    #[error("{operation} failed for {id}: {source}")]
    Load {
        operation: &'static str,
        id: String,
        #[source]
        source: BoxError,
    },

    /// 批量任务中有单元失败
    #[error(transparent)]
    Batch(#[from] BatchFailure),

    /// 操作被取消
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// 是否为资源不存在错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }
}

/// 单个工作单元的失败记录
#[derive(Error, Debug)]
#[error("unit {unit} failed: {source}")]
pub struct TaskError {
    /// 工作单元标识
    pub unit: String,
    /// 失败原因
    #[source]
    pub source: BoxError,
}

impl TaskError {
    pub fn new(unit: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            unit: unit.into(),
            source: source.into(),
        }
    }
}

/// 批量失败汇总
///
/// 仅在所有工作单元结束后生成，`failures` 至少包含一项
#[derive(Error, Debug)]
#[error("batch failed: {} of {total} units failed", .failures.len())]
pub struct BatchFailure {
    /// 批次中的单元总数
    pub total: usize,
    /// 逐项失败记录
    pub failures: Vec<TaskError>,
}

impl BatchFailure {
    /// 失败单元数量
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// 失败单元的标识列表
    pub fn failed_units(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.unit.as_str()).collect()
    }
}

/// 核心操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;
