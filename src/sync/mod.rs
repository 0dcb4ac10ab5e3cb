//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了并发编排机制，包括批量扇出执行和事件多路复用。

pub mod fan_out;
pub mod multiplexer;

pub use fan_out::{BatchOutcome, FanOutExecutor, UnitReport, WorkUnit};
pub use multiplexer::{
    DispatchTable, EventMultiplexer, EventSource, ExitReason, MultiplexReport, MultiplexerState,
};
