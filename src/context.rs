//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了请求上下文，承载取消信号和截止时间。

use crate::clock::deadline_after;
use crate::error::CoreError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 请求上下文
///
/// 由调用方创建并传入读穿服务和加载器，加载器可据此提前放弃工作。
/// 派生出的子上下文会随父上下文一起取消。
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// 无截止时间、未取消的根上下文
    pub fn background() -> Self {
        Self::default()
    }

    /// 派生带超时的子上下文，截止时间取父子中较早者
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::from_std(deadline_after(Instant::now().into_std(), timeout));
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    /// 派生可单独取消的子上下文
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// 取消该上下文及其所有子上下文
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 底层取消令牌
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// 等待上下文结束，返回结束原因
    ///
    /// 根上下文既不取消也无截止时间时永远不会返回
    pub async fn done(&self) -> CoreError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => CoreError::Cancelled("context cancelled".to_string()),
                _ = tokio::time::sleep_until(deadline) => {
                    CoreError::Timeout("context deadline exceeded".to_string())
                }
            },
            None => {
                self.token.cancelled().await;
                CoreError::Cancelled("context cancelled".to_string())
            }
        }
    }
}
