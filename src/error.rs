use ducominer_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Engine error: {0}")]
    Core(#[from] CoreError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Work error: {0}")]
    Work(#[from] WorkError),

    #[error("System error: {0}")]
    System(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Pool discovery failed: {url}, error: {error}")]
    DiscoveryFailed { url: String, error: String },

    #[error("Connection failed: {address}, error: {error}")]
    ConnectionFailed { address: String, error: String },

    #[error("Pool timeout: {address}, operation: {operation}")]
    Timeout { address: String, operation: String },

    #[error("Connection closed by pool: {address}")]
    ConnectionClosed { address: String },

    #[error("Protocol error: {address}, error: {error}")]
    ProtocolError { address: String, error: String },

    #[error("Malformed job from pool: {raw:?}")]
    MalformedJob { raw: String },

    #[error("Invalid pool endpoint: {value}")]
    InvalidEndpoint { value: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkError {
    #[error("Job queue closed")]
    QueueClosed,

    #[error("Share failed local verification: nonce {nonce}")]
    VerificationFailed { nonce: u32 },

    #[error("Compute thread unavailable: {reason}")]
    ComputeUnavailable { reason: String },
}

/// 进程退出码: 设备准备失败
pub const EXIT_DEVICE_PROVISIONING: i32 = 2;

// 错误恢复策略
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// 短暂退避后在同一连接上重试
    Retry { delay_ms: u64 },
    /// 关闭连接，延迟后重连
    Reconnect { delay_ms: u64 },
    /// 计为异常并继续
    Ignore,
    /// 无法恢复，退出进程
    Exit { code: i32 },
}

impl PoolError {
    /// 可以通过重试或重连恢复的错误
    pub fn is_transient(&self) -> bool {
        !matches!(self, PoolError::InvalidEndpoint { .. })
    }

    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            PoolError::MalformedJob { .. } => RecoveryStrategy::Retry { delay_ms: 1000 },
            PoolError::InvalidEndpoint { .. } => RecoveryStrategy::Exit { code: 1 },
            _ => RecoveryStrategy::Reconnect { delay_ms: 5000 },
        }
    }
}

impl MiningError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            MiningError::Pool(e) => e.recovery_strategy(),
            MiningError::Core(CoreError::Device(e)) if e.is_provisioning() => RecoveryStrategy::Exit {
                code: EXIT_DEVICE_PROVISIONING,
            },
            MiningError::Core(CoreError::Exhausted { .. }) => RecoveryStrategy::Ignore,
            MiningError::Core(e) if e.is_fatal() => RecoveryStrategy::Exit { code: 1 },
            MiningError::Core(_) => RecoveryStrategy::Reconnect { delay_ms: 5000 },
            MiningError::Work(WorkError::VerificationFailed { .. }) => RecoveryStrategy::Ignore,
            // 计算线程已退出，重连无法恢复
            MiningError::Work(WorkError::ComputeUnavailable { .. }) => RecoveryStrategy::Exit { code: 1 },
            MiningError::Work(_) => RecoveryStrategy::Reconnect { delay_ms: 5000 },
            MiningError::System(_) => RecoveryStrategy::Reconnect { delay_ms: 5000 },
        }
    }

    /// 给用户的补救提示
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            MiningError::Core(CoreError::Device(e)) => Some(e.remediation()),
            _ => None,
        }
    }
}
