use crate::pool::{PoolEndpoint, StartDifficulty};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, ValueEnum};
use ducominer_g_opencl_core::{AutotuneConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;


/// 协议版本，随份额标签一起发送
pub const PROTOCOL_VERSION: &str = "4.3";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ducominer-rs", version, about = "DUCO-S1 mining client with CPU and OpenCL backends")]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "ducominer.toml")]
    pub config: String,

    /// Wallet username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Mining key (base64 encoded, as stored by the official miners)
    #[arg(long)]
    pub mining_key: Option<String>,

    /// Hash search backend
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendChoice>,

    /// Number of CPU worker threads
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Mining intensity (1-100)
    #[arg(short, long)]
    pub intensity: Option<u8>,

    /// Starting difficulty tier: LOW, MEDIUM or NET
    #[arg(long)]
    pub start_diff: Option<StartDifficulty>,

    /// Rig identifier shown in the wallet
    #[arg(long)]
    pub identifier: Option<String>,

    /// Fixed pool address (host:port), skips discovery
    #[arg(long)]
    pub pool: Option<String>,

    /// GPU device index
    #[arg(long)]
    pub gpu_device: Option<usize>,

    /// OpenCL work-group size
    #[arg(long)]
    pub work_size: Option<usize>,

    /// Fixed batch multiplier, disables autotuning
    #[arg(long)]
    pub batch_multiplier: Option<f64>,

    /// Upper bound for the autotuned batch multiplier
    #[arg(long)]
    pub autotune_max_multiplier: Option<f64>,

    /// Benchmark samples per autotune step
    #[arg(long)]
    pub autotune_samples: Option<usize>,

    /// Scale applied to sample spread when judging autotune improvements
    #[arg(long)]
    pub autotune_min_delta_scale: Option<f64>,

    /// List OpenCL GPU devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Log level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<String>,
}

/// 哈希搜索后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Cpu,
    Gpu,
    Virtual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub username: String,
    /// base64 编码的挖矿密钥，未设置时发送 "None"
    pub mining_key: Option<String>,
    pub start_diff: StartDifficulty,
    pub identifier: String,
    pub threads: usize,
    pub intensity: u8,
    pub backend: BackendChoice,
    pub report_interval_secs: u64,
    /// 份额提交时的客户端标签
    pub client_label: String,
    pub pool: PoolSettings,
    pub gpu: GpuSettings,
    pub tuning: TuningSettings,
    pub switching: SwitchingSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub discovery_url: String,
    /// 固定矿池地址 host:port
    pub static_endpoint: Option<String>,
    pub socket_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    /// 连续连接失败多少次后重新发现矿池
    pub max_connect_retries: u32,
    pub connect_retry_delay_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    pub device: usize,
    pub work_size: Option<usize>,
    pub batch_multiplier: Option<f64>,
    pub autotune_max_multiplier: Option<f64>,
    pub autotune_samples: Option<usize>,
    pub autotune_min_delta_scale: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningSettings {
    pub enabled: bool,
    pub window_secs: u64,
    pub step: u8,
    pub min_intensity: u8,
    pub max_intensity: u8,
    pub high_reject_ratio: f64,
    pub low_reject_ratio: f64,
    pub high_ping_ms: f64,
    pub low_ping_ms: f64,
    pub max_temperature: f32,
    pub ping_samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchingSettings {
    pub enabled: bool,
    pub latency_threshold_ms: f64,
    pub latency_dwell_secs: u64,
    pub error_threshold: u32,
    pub error_dwell_secs: u64,
    pub min_dwell_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<String>,
    pub colored: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            mining_key: None,
            start_diff: StartDifficulty::Medium,
            identifier: "None".to_string(),
            threads: num_cpus::get().max(1),
            intensity: 95,
            backend: BackendChoice::Cpu,
            report_interval_secs: 300,
            client_label: format!("Official PC Miner {}", PROTOCOL_VERSION),
            pool: PoolSettings::default(),
            gpu: GpuSettings::default(),
            tuning: TuningSettings::default(),
            switching: SwitchingSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            discovery_url: "https://server.duinocoin.com/getPool".to_string(),
            static_endpoint: None,
            socket_timeout_secs: 10,
            reconnect_delay_secs: 5,
            max_connect_retries: 3,
            connect_retry_delay_secs: 10,
        }
    }
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 45,
            step: 5,
            min_intensity: 5,
            max_intensity: 100,
            high_reject_ratio: 0.10,
            low_reject_ratio: 0.03,
            high_ping_ms: 850.0,
            low_ping_ms: 500.0,
            max_temperature: 80.0,
            ping_samples: 30,
        }
    }
}

impl Default for SwitchingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_threshold_ms: 800.0,
            latency_dwell_secs: 30,
            error_threshold: 3,
            error_dwell_secs: 10,
            min_dwell_secs: 10,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            colored: true,
        }
    }
}

impl MinerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let config_content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: MinerConfig = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }

    /// 配置文件不存在时使用默认值，命令行参数优先，最后统一校验
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = if Path::new(&args.config).exists() {
            Self::load(&args.config)?
        } else {
            Self::default()
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let config_content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, config_content).with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(username) = &args.username {
            self.username = username.clone();
        }
        if let Some(key) = &args.mining_key {
            self.mining_key = Some(key.clone());
        }
        if let Some(backend) = args.backend {
            self.backend = backend;
        }
        if let Some(threads) = args.threads {
            self.threads = threads;
        }
        if let Some(intensity) = args.intensity {
            self.intensity = intensity;
        }
        if let Some(start_diff) = args.start_diff {
            self.start_diff = start_diff;
        }
        if let Some(identifier) = &args.identifier {
            self.identifier = identifier.clone();
        }
        if let Some(pool) = &args.pool {
            self.pool.static_endpoint = Some(pool.clone());
        }
        if let Some(device) = args.gpu_device {
            self.gpu.device = device;
        }
        if args.work_size.is_some() {
            self.gpu.work_size = args.work_size;
        }
        if args.batch_multiplier.is_some() {
            self.gpu.batch_multiplier = args.batch_multiplier;
        }
        if args.autotune_max_multiplier.is_some() {
            self.gpu.autotune_max_multiplier = args.autotune_max_multiplier;
        }
        if args.autotune_samples.is_some() {
            self.gpu.autotune_samples = args.autotune_samples;
        }
        if args.autotune_min_delta_scale.is_some() {
            self.gpu.autotune_min_delta_scale = args.autotune_min_delta_scale;
        }
        if args.debug {
            self.logging.level = "debug".to_string();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(file) = &args.log_file {
            self.logging.file = Some(file.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            anyhow::bail!("A username must be configured (--username or `username` in the config file)");
        }

        if self.username.contains(',') || self.identifier.contains(',') {
            anyhow::bail!("Username and identifier cannot contain ','");
        }

        if !(1..=100).contains(&self.intensity) {
            anyhow::bail!("Intensity {} is out of range (1-100)", self.intensity);
        }

        if self.backend == BackendChoice::Cpu && self.threads == 0 {
            anyhow::bail!("CPU backend needs at least one thread");
        }

        if self.report_interval_secs == 0 {
            anyhow::bail!("Report interval must be greater than 0");
        }

        if self.pool.socket_timeout_secs == 0 {
            anyhow::bail!("Socket timeout must be greater than 0");
        }

        if let Some(endpoint) = &self.pool.static_endpoint {
            endpoint
                .parse::<PoolEndpoint>()
                .with_context(|| format!("Invalid static pool endpoint: {}", endpoint))?;
        }

        if self.gpu.work_size == Some(0) {
            anyhow::bail!("Work size must be a positive integer");
        }

        if let Some(multiplier) = self.gpu.batch_multiplier {
            if multiplier <= 0.0 {
                anyhow::bail!("Batch multiplier must be greater than 0");
            }
        }

        if let Some(samples) = self.gpu.autotune_samples {
            if samples < 2 {
                anyhow::bail!("Autotune samples must be at least 2");
            }
        }

        if let Some(scale) = self.gpu.autotune_min_delta_scale {
            if scale <= 0.0 {
                anyhow::bail!("Autotune min delta scale must be greater than 0");
            }
        }

        let tuning = &self.tuning;
        if tuning.min_intensity == 0 || tuning.min_intensity > tuning.max_intensity || tuning.max_intensity > 100 {
            anyhow::bail!(
                "Tuning intensity bounds {}-{} are invalid",
                tuning.min_intensity,
                tuning.max_intensity
            );
        }

        if tuning.window_secs == 0 || tuning.ping_samples == 0 {
            anyhow::bail!("Tuning window and ping samples must be greater than 0");
        }

        Ok(())
    }

    /// 解码挖矿密钥: 未设置时为 "None"，base64 解码为 UTF-8 成功则用解码结果，否则原样使用
    pub fn decoded_mining_key(&self) -> String {
        match &self.mining_key {
            None => "None".to_string(),
            Some(raw) if raw == "None" => raw.clone(),
            Some(raw) => STANDARD
                .decode(raw.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or_else(|| raw.clone()),
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.socket_timeout_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            work_size: self.gpu.work_size,
            batch_multiplier: self.gpu.batch_multiplier,
            autotune_max_multiplier: self.gpu.autotune_max_multiplier,
            autotune: AutotuneConfig::new(self.gpu.autotune_samples, self.gpu.autotune_min_delta_scale),
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            BackendChoice::Cpu => "CPU",
            BackendChoice::Gpu => "OpenCL GPU",
            BackendChoice::Virtual => "virtual device",
        }
    }

    /// CPU 后端每个线程一个工作单元，GPU/虚拟设备只有一个
    pub fn worker_count(&self) -> usize {
        match self.backend {
            BackendChoice::Cpu => self.threads,
            BackendChoice::Gpu | BackendChoice::Virtual => 1,
        }
    }
}
