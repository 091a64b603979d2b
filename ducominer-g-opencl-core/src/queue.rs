//! 计算队列抽象
//!
//! 调度器只依赖这个特征：OpenCL 设备和虚拟设备都实现为有序命令队列，
//! 批次提交后立即返回在途句柄，结果通过句柄异步取回。

use ducominer_core::types::DIGEST_LEN;
use ducominer_core::{DeviceCapabilities, DeviceError};
use std::time::Duration;

/// 结果取回方式，每个会话探测一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// 零拷贝异步映射/解除映射
    Mapped,
    /// 异步拷贝到主机乒乓缓冲区
    Copied,
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalMode::Mapped => write!(f, "mapped"),
            RetrievalMode::Copied => write!(f, "copied"),
        }
    }
}

/// 一次内核调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    pub start_nonce: u32,
    /// 实际检查的 nonce 数量
    pub nonce_count: u32,
    /// 全局工作项数量（工作组大小的整数倍）
    pub global_size: usize,
    pub local_size: usize,
    /// 乒乓缓冲区槽位 (0 或 1)
    pub slot: usize,
}

/// 批次结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Found(u32),
    NotFound,
}

/// 有序计算队列
pub trait ComputeQueue: Send {
    /// 在途批次句柄，持有内核事件和取回事件
    type InFlight: Send;

    /// 设备名称
    fn name(&self) -> String;

    /// 设备能力
    fn capabilities(&self) -> DeviceCapabilities;

    /// 探测结果取回方式
    fn probe_retrieval(&mut self) -> RetrievalMode;

    /// 上传任务数据（last_hash 与目标摘要）
    fn load_job(&mut self, base_message: &[u8], expected: &[u8; DIGEST_LEN]) -> Result<(), DeviceError>;

    /// 清零标志、入队内核并入队异步取回，立即返回
    fn dispatch(&mut self, request: &BatchRequest, mode: RetrievalMode) -> Result<Self::InFlight, DeviceError>;

    /// 等待取回完成并读取结果，释放映射
    fn complete(&mut self, in_flight: Self::InFlight) -> Result<BatchOutcome, DeviceError>;

    /// 同步执行一个批次并返回耗时，用于自动调优
    fn benchmark(&mut self, request: &BatchRequest) -> Result<Duration, DeviceError>;
}
