//! DUCOMiner-RS - DUCO-S1 工作量证明挖矿客户端
//!
//! 工作区结构:
//! - `ducominer-core`: 任务/份额类型、DUCO-S1 摘要和 `SearchEngine` 接口
//! - `ducominer-s-cpu-core`: CPU 哈希后端和节流
//! - `ducominer-g-opencl-core`: OpenCL 与虚拟设备批量调度
//!
//! 本 crate 负责矿池发现、会话协议、工作单元、强度调节、矿池切换和状态报告。

pub mod config;
pub mod error;
pub mod logging;
pub mod mining;
pub mod monitoring;
pub mod pool;
pub mod utils;

pub use config::{Args, MinerConfig};
pub use error::MiningError;
pub use mining::MiningManager;

/// 程序版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 程序名称
pub const NAME: &str = "ducominer-rs";
