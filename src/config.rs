//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了核心组件的配置结构和解析逻辑。

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

/// 单个TTL允许的最大值（30天）
const MAX_TTL_SECS: u64 = 86400 * 30;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub read_through: ReadThroughConfig,
    #[serde(default)]
    pub fan_out: FanOutConfig,
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
}

/// 全局配置
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// 服务名称，作为各组件的日志和指标标签
    pub service_name: String,
    /// 默认日志级别，`RUST_LOG` 优先
    pub log_level: String,
    /// 是否启用指标收集
    pub enable_metrics: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            service_name: "oxflow".to_string(),
            log_level: "info".to_string(),
            enable_metrics: true,
        }
    }
}

/// 过期缓存配置
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// 条目存活时间（秒）
    pub ttl_secs: u64,
    /// 过期清理间隔（秒），0表示只做读时惰性淘汰
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            cleanup_interval_secs: 0,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// 清理间隔，未启用时返回 None
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }
}

/// 读穿服务配置
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReadThroughConfig {
    /// 缓存键前缀，键格式为 "{prefix}:{id}"
    pub key_prefix: String,
    /// 是否合并同一键的并发回源
    pub single_flight: bool,
    /// 单次回源超时（毫秒），0表示不限制
    pub load_timeout_ms: u64,
}

impl Default for ReadThroughConfig {
    fn default() -> Self {
        Self {
            key_prefix: "user".to_string(),
            single_flight: false,
            load_timeout_ms: 30_000,
        }
    }
}

impl ReadThroughConfig {
    pub fn load_timeout(&self) -> Option<Duration> {
        (self.load_timeout_ms > 0).then(|| Duration::from_millis(self.load_timeout_ms))
    }
}

/// 失败记录的排列顺序
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrder {
    /// 按完成顺序
    #[default]
    Completion,
    /// 按输入顺序
    Input,
}

/// 扇出执行器配置
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct FanOutConfig {
    /// 最大并发数，0表示每个单元一个任务且不设上限
    pub max_concurrency: usize,
    /// 失败记录排列顺序
    pub failure_order: FailureOrder,
}

/// 处理器出错时的策略
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// 记录日志后继续等待
    #[default]
    LogAndContinue,
    /// 终止循环
    Abort,
}

/// 事件多路复用器配置
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// 空闲超时（毫秒），每次分发后重新计时
    pub idle_timeout_ms: u64,
    /// 处理器出错策略
    pub handler_error_policy: HandlerErrorPolicy,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5000,
            handler_error_policy: HandlerErrorPolicy::LogAndContinue,
        }
    }
}

impl MultiplexerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Config {
    /// 从TOML字符串解析并验证配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| CoreError::ConfigError(format!("failed to parse config: {}", e)))?;
        config.validate().map_err(CoreError::ConfigError)?;
        Ok(config)
    }

    /// 从文件读取并验证配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// 输出为TOML字符串
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CoreError::ConfigError(format!("failed to render config: {}", e)))
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        let name = &self.global.service_name;
        if name.is_empty() {
            return Err("Service name cannot be empty".to_string());
        }
        if name.contains(':') {
            return Err(format!("Service name '{}' must not contain ':'", name));
        }
        if name.len() > 64 {
            return Err(format!(
                "Service name '{}' exceeds maximum length of 64 characters",
                name
            ));
        }

        // 缓存
        if self.cache.ttl_secs == 0 {
            return Err("Cache ttl_secs cannot be zero".to_string());
        }
        if self.cache.ttl_secs > MAX_TTL_SECS {
            return Err("Cache ttl_secs cannot exceed 30 days (2592000 seconds)".to_string());
        }
        if self.cache.cleanup_interval_secs > self.cache.ttl_secs {
            return Err(format!(
                "Cache cleanup_interval_secs ({}) must be <= ttl_secs ({})",
                self.cache.cleanup_interval_secs, self.cache.ttl_secs
            ));
        }

        // 读穿服务
        if self.read_through.key_prefix.is_empty() {
            return Err("Read-through key_prefix cannot be empty".to_string());
        }
        if self.read_through.key_prefix.contains(':') {
            return Err(format!(
                "Read-through key_prefix '{}' must not contain ':'",
                self.read_through.key_prefix
            ));
        }
        if self.read_through.load_timeout_ms > 600_000 {
            return Err("Read-through load_timeout_ms cannot exceed 600000 ms".to_string());
        }

        // 扇出执行器
        if self.fan_out.max_concurrency > 10_000 {
            return Err("Fan-out max_concurrency cannot exceed 10000".to_string());
        }

        // 多路复用器
        if self.multiplexer.idle_timeout_ms == 0 {
            return Err("Multiplexer idle_timeout_ms cannot be zero".to_string());
        }
        if self.multiplexer.idle_timeout_ms > 3_600_000 {
            return Err("Multiplexer idle_timeout_ms cannot exceed 3600000 ms".to_string());
        }

        Ok(())
    }
}
