//! 日志初始化

pub mod formatter;

use crate::error::MiningError;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use formatter::MinerFormatter;

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub colored: bool,
    pub rotation: LogRotation,
}

/// 日志文件轮转
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            colored: true,
            rotation: LogRotation::Daily,
        }
    }
}

impl From<&crate::config::LoggingSettings> for LogConfig {
    fn from(settings: &crate::config::LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            file_path: settings.file.clone(),
            colored: settings.colored,
            ..Default::default()
        }
    }
}

/// 未设置 RUST_LOG 时使用的过滤规则，覆盖工作区各 crate 和状态行
pub fn default_directives(level: &str) -> String {
    let level = match level.to_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error") => l.to_string(),
        _ => "info".to_string(),
    };
    ["ducominer_rs", "ducominer_core", "ducominer_s_cpu_core", "ducominer_g_opencl_core", "ducominer::status"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// 初始化日志系统，写文件时返回的 guard 必须在进程退出前保持存活
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, MiningError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(&config.level)))
        .map_err(|e| MiningError::System(format!("Invalid log filter: {}", e)))?;

    let console_layer = fmt::layer()
        .with_ansi(config.colored)
        .event_format(MinerFormatter::new(config.colored))
        .boxed();

    let registry = tracing_subscriber::registry().with(env_filter).with(console_layer);

    let Some(file_path) = config.file_path else {
        registry
            .try_init()
            .map_err(|e| MiningError::System(format!("Failed to initialize logging: {}", e)))?;
        return Ok(None);
    };

    let file_path = Path::new(&file_path);
    let directory = file_path.parent().unwrap_or(Path::new("."));
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("ducominer.log");

    let (writer, guard) = match config.rotation {
        LogRotation::Never => non_blocking(rolling::never(directory, file_name)),
        LogRotation::Hourly => non_blocking(rolling::hourly(directory, file_name)),
        LogRotation::Daily => non_blocking(rolling::daily(directory, file_name)),
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .json();

    registry
        .with(file_layer)
        .try_init()
        .map_err(|e| MiningError::System(format!("Failed to initialize logging: {}", e)))?;

    Ok(Some(guard))
}
