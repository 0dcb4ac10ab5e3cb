//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存存储后端。

pub mod expiring;

pub use expiring::ExpiringCache;
