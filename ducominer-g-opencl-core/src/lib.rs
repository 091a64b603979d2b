//! DUCO Miner GPU Core - GPU批处理调度核心
//!
//! 这个库负责把 nonce 空间切成批次交给有序计算队列执行：
//! - 根据设备能力选择工作组大小和批大小
//! - 每个会话自动调优一次批倍数
//! - 深度为 1 的软件流水线，批次结果异步取回
//!
//! OpenCL 设备需要启用 `opencl` 特性；虚拟设备在主机线程上执行同一内核约定。

pub mod autotune;
pub mod kernel;
pub mod plan;
pub mod queue;
pub mod scheduler;
pub mod virtual_device;

#[cfg(feature = "opencl")]
pub mod opencl;

// 重新导出主要类型
pub use autotune::{AutotuneConfig, AutotuneOutcome};
pub use queue::{BatchOutcome, BatchRequest, ComputeQueue, RetrievalMode};
pub use scheduler::{GpuBatchScheduler, SchedulerConfig, SolveStats, StageState};
pub use virtual_device::VirtualDevice;

use ducominer_core::{BackendKind, CoreError, DeviceCapabilities, DeviceError, SearchEngine};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 打开 OpenCL GPU 并创建调度器
#[cfg(feature = "opencl")]
pub fn open_gpu_engine(index: usize, config: SchedulerConfig) -> Result<Box<dyn SearchEngine>, CoreError> {
    let device = opencl::OpenClDevice::open(index)?;
    Ok(Box::new(GpuBatchScheduler::new(device, BackendKind::OpenCl, config)?))
}

/// 未编译 OpenCL 支持
#[cfg(not(feature = "opencl"))]
pub fn open_gpu_engine(_index: usize, _config: SchedulerConfig) -> Result<Box<dyn SearchEngine>, CoreError> {
    Err(DeviceError::NoDevices {
        message: "this build does not include OpenCL support (rebuild with --features opencl)".to_string(),
    }
    .into())
}

/// 列出可用 GPU
#[cfg(feature = "opencl")]
pub fn list_gpu_devices() -> Result<Vec<String>, DeviceError> {
    opencl::describe_devices()
}

/// 未编译 OpenCL 支持
#[cfg(not(feature = "opencl"))]
pub fn list_gpu_devices() -> Result<Vec<String>, DeviceError> {
    Err(DeviceError::NoDevices {
        message: "this build does not include OpenCL support (rebuild with --features opencl)".to_string(),
    })
}

/// 创建虚拟设备调度器
pub fn open_virtual_engine(
    capabilities: DeviceCapabilities,
    config: SchedulerConfig,
) -> Result<Box<dyn SearchEngine>, CoreError> {
    let device = VirtualDevice::new(capabilities, true)?;
    Ok(Box::new(GpuBatchScheduler::new(device, BackendKind::Virtual, config)?))
}

/// 虚拟设备默认规格
pub fn default_virtual_capabilities() -> DeviceCapabilities {
    DeviceCapabilities {
        max_work_group_size: 256,
        max_work_items_dim0: 1024,
        compute_units: 4,
    }
}
