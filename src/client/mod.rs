//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了面向外部调用方的读穿服务和加载器接口。

pub mod loader;
pub mod read_through;

pub use loader::{Loader, MemoryLoader};
pub use read_through::ReadThroughService;
