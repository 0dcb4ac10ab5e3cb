//! oxflow - 异步服务并发核心
//!
//! 提供进程内过期缓存、读穿服务、有界扇出执行器和事件多路复用器，
//! 供外部的请求处理和批处理代码通过窄接口调用。

#![doc(html_root_url = "https://docs.rs/oxflow/0.1.0")]

pub use tokio;

pub mod backend;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod sync;
pub mod utils;

// Re-export commonly used items
pub use backend::ExpiringCache;
pub use client::{Loader, MemoryLoader, ReadThroughService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::Context;
pub use error::{BatchFailure, BoxError, CoreError, Result, TaskError};
pub use metrics::Metrics;
pub use sync::{
    BatchOutcome, DispatchTable, EventMultiplexer, EventSource, ExitReason, FanOutExecutor,
    MultiplexReport, MultiplexerState, UnitReport, WorkUnit,
};

/// oxflow 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
