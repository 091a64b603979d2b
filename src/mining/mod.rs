pub mod compute;
pub mod hashmeter;
pub mod intensity;
pub mod manager;
pub mod pipeline;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use compute::ComputeWorker;
pub use hashmeter::{Hashmeter, LocalCounters, MinerStatus, StatusCache, StatusSnapshot, STATUS_TARGET};
pub use intensity::{IntensityTuner, PingWindow};
pub use manager::MiningManager;
pub use pipeline::{JobPipeline, PipelineConfig, QueuedJob};
pub use worker::{MiningWorker, WorkerContext};

/// 挖矿状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MiningState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// 启动失败
    Error(String),
}
