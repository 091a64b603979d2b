//! 错误类型定义

use thiserror::Error;

/// 核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("设备错误: {0}")]
    Device(#[from] DeviceError),

    #[error("配置错误: {message}")]
    Config { message: String },

    #[error("任务无效: {message}")]
    InvalidJob { message: String },

    #[error("搜索空间耗尽: 难度 {difficulty}, 已检查 {checked} 个 nonce")]
    Exhausted { difficulty: u64, checked: u64 },

    #[error("自检失败: {message}")]
    SelfTest { message: String },
}

/// 设备错误类型
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("未找到GPU设备: {message}")]
    NoDevices { message: String },

    #[error("设备未找到: 索引 {index}, 可用设备 {available} 个")]
    NotFound { index: usize, available: usize },

    #[error("设备初始化失败: {message}")]
    InitializationFailed { message: String },

    #[error("内核编译失败: {message}")]
    ProgramBuild { message: String },

    #[error("设备通信错误: {message}")]
    CommunicationError { message: String },

    #[error("设备配置无效: {message}")]
    InvalidConfiguration { message: String },
}

impl CoreError {
    /// 创建配置错误
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// 创建任务无效错误
    pub fn invalid_job<S: Into<String>>(message: S) -> Self {
        Self::InvalidJob {
            message: message.into(),
        }
    }

    /// 创建自检失败错误
    pub fn self_test<S: Into<String>>(message: S) -> Self {
        Self::SelfTest {
            message: message.into(),
        }
    }

    /// 设备配置类错误无法靠重连恢复
    pub fn is_fatal(&self) -> bool {
        match self {
            CoreError::Device(err) => err.is_provisioning(),
            CoreError::Config { .. } | CoreError::SelfTest { .. } => true,
            _ => false,
        }
    }
}

impl DeviceError {
    /// 创建设备未找到错误
    pub fn not_found(index: usize, available: usize) -> Self {
        Self::NotFound { index, available }
    }

    /// 创建初始化失败错误
    pub fn initialization_failed<S: Into<String>>(message: S) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// 创建内核编译错误
    pub fn program_build<S: Into<String>>(message: S) -> Self {
        Self::ProgramBuild {
            message: message.into(),
        }
    }

    /// 创建通信错误
    pub fn communication_error<S: Into<String>>(message: S) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// 创建配置无效错误
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// 设备准备阶段的错误（驱动、上下文、编译、索引）
    pub fn is_provisioning(&self) -> bool {
        !matches!(self, DeviceError::CommunicationError { .. })
    }

    /// 给用户的补救提示
    pub fn remediation(&self) -> &'static str {
        match self {
            DeviceError::NoDevices { .. } => {
                "Install an OpenCL runtime (GPU vendor driver or ICD loader) and check `clinfo` lists a GPU"
            }
            DeviceError::NotFound { .. } => "Pick a valid index with --gpu-device (see the device list in the log)",
            DeviceError::InitializationFailed { .. } => {
                "Update the GPU driver; another process may also hold the device"
            }
            DeviceError::ProgramBuild { .. } => "The OpenCL compiler rejected the kernel; update the GPU driver",
            DeviceError::InvalidConfiguration { .. } => "Fix the [gpu] section of the configuration file",
            DeviceError::CommunicationError { .. } => "Restart the miner; check the GPU is not overheating",
        }
    }
}
