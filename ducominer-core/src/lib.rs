//! DUCO Miner Core - 核心特征和类型定义
//!
//! 这个库定义了所有哈希搜索后端必须实现的基础特征和类型，
//! 为CPU和GPU后端提供统一的接口。

pub mod ducos1;
pub mod engine;
pub mod error;
pub mod types;

// 重新导出常用类型
pub use ducos1::{candidate_digest, decode_digest, self_test_job, verify_nonce};
pub use engine::SearchEngine;
pub use error::{CoreError, DeviceError};
pub use types::{BatchPlan, DeviceCapabilities, Job, Share};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 搜索后端类型标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BackendKind {
    /// 前缀状态复用的CPU哈希
    Accelerated,
    /// 逐个拼接消息的CPU哈希
    Sequential,
    /// OpenCL GPU
    OpenCl,
    /// 主机线程模拟的有序命令队列
    Virtual,
}

impl BackendKind {
    /// 是否为批处理后端（GPU或虚拟设备）
    pub fn is_batched(&self) -> bool {
        matches!(self, BackendKind::OpenCl | BackendKind::Virtual)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Accelerated => write!(f, "cpu-accelerated"),
            BackendKind::Sequential => write!(f, "cpu-sequential"),
            BackendKind::OpenCl => write!(f, "opencl"),
            BackendKind::Virtual => write!(f, "virtual"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu-accelerated" | "accelerated" => Ok(BackendKind::Accelerated),
            "cpu-sequential" | "sequential" => Ok(BackendKind::Sequential),
            "opencl" | "gpu" => Ok(BackendKind::OpenCl),
            "virtual" => Ok(BackendKind::Virtual),
            other => Err(CoreError::config(format!("未知的后端类型: {}", other))),
        }
    }
}
