//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 统一工具模块
//!
//! 提供库、命令行和测试共用的工具函数，包括：
//! - 日志设置工具
//! - 缓存键构造
//! - 名称生成工具

use std::fmt::Display;
use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// 测试用日志初始化，多次调用只生效一次
pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 命令行日志初始化
///
/// `RUST_LOG` 存在时优先，否则使用 `default_level`
pub fn init_logging(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .ok();
    });
}

/// 构造缓存键，格式为 "{prefix}:{id}"
///
/// 前缀不含 ':' 时，不同 (prefix, id) 组合得到不同的键
pub fn cache_key<T: Display + ?Sized>(prefix: &str, id: &T) -> String {
    format!("{}:{}", prefix, id)
}

/// 生成唯一的名称
pub fn generate_unique_name(base: &str) -> String {
    format!("{}_{}", base, uuid::Uuid::new_v4().simple())
}
