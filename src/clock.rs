//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了可注入的时钟，用于过期判断和确定性测试。

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 时钟能力
///
/// 缓存通过该接口获取当前时间，测试中可替换为手动推进的时钟
pub trait Clock: Send + Sync + Debug {
    /// 当前时间
    fn now(&self) -> Instant;
}

/// 超出 `Instant` 表示范围时使用的截止时间（约30年后）
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// 计算 `now + after`，溢出时退化为远期时间
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// 系统时钟
///
/// 基于 tokio 时间源，在 `start_paused` 测试中同样遵循暂停和自动推进
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// 手动时钟
///
/// 时间只在调用 [`ManualClock::advance`] 时前进
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// 将时钟向前推进
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// 自创建以来经过的时间
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}
