//! DUCO Miner CPU Core - CPU哈希搜索核心
//!
//! 提供两种 DUCO-S1 搜索实现：
//! - 加速实现：先吸收 last_hash 前缀，每个 nonce 克隆 SHA1 中间状态
//! - 顺序实现：每个 nonce 完整拼接消息后计算摘要
//!
//! 启动时通过自检选择一次后端，整个进程生命周期内复用。

pub mod backend;
pub mod engine;
pub mod hasher;
pub mod throttle;

// 重新导出主要类型
pub use backend::{cached_backend, run_self_test, select_backend, BackendSelection, HashBackend};
pub use engine::CpuSearchEngine;
pub use hasher::SearchOutcome;
pub use throttle::{efficiency_for_intensity, Throttle};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 禁用加速后端的环境变量，值为 `sequential` 时生效
pub const BACKEND_ENV: &str = "DUCOMINER_CPU_BACKEND";
