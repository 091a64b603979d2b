//! 批倍数自动调优
//!
//! 从起始倍数开始逐步增大，每个倍数采样多次取中位数速率；
//! 只要速率超过当前最优值一个动态容差就继续，否则停在最优值。

use ducominer_core::DeviceError;
use serde::{Deserialize, Serialize};

/// 默认采样次数
pub const DEFAULT_SAMPLES: usize = 10;
/// 最小采样次数
pub const MIN_SAMPLES: usize = 2;
/// 默认容差缩放系数
pub const DEFAULT_MIN_DELTA_SCALE: f64 = 0.5;
/// 起始倍数
pub const DEFAULT_START_MULTIPLIER: f64 = 2.0;

/// 自动调优配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutotuneConfig {
    /// 每个倍数的采样次数
    pub samples: usize,
    /// 相对标准差的缩放系数
    pub min_delta_scale: f64,
    /// 平台期容差下限
    pub plateau_tolerance: f64,
    /// 倍数步长
    pub step: f64,
}

impl AutotuneConfig {
    /// 从可选配置创建，非法值回落到默认值
    pub fn new(samples: Option<usize>, min_delta_scale: Option<f64>) -> Self {
        Self {
            samples: samples.unwrap_or(DEFAULT_SAMPLES).max(MIN_SAMPLES),
            min_delta_scale: min_delta_scale
                .filter(|scale| *scale > 0.0)
                .unwrap_or(DEFAULT_MIN_DELTA_SCALE),
            ..Self::default()
        }
    }
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            min_delta_scale: DEFAULT_MIN_DELTA_SCALE,
            plateau_tolerance: 0.05,
            step: 1.0,
        }
    }
}

/// 单个倍数的测量结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutotuneStep {
    pub multiplier: f64,
    pub median_rate: f64,
    pub accepted: bool,
}

/// 调优结果
#[derive(Debug, Clone, PartialEq)]
pub struct AutotuneOutcome {
    pub best_multiplier: f64,
    pub best_rate: f64,
    pub steps: Vec<AutotuneStep>,
}

/// 中位数，空输入返回 0
pub fn median(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// 总体相对标准差
pub fn relative_std_dev(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// 执行自动调优
///
/// `measure` 对给定倍数返回每次采样的速率 (H/s)，返回空列表时停止。
pub fn autotune<F>(
    start: f64,
    max_multiplier: f64,
    config: &AutotuneConfig,
    mut measure: F,
) -> Result<AutotuneOutcome, DeviceError>
where
    F: FnMut(f64) -> Result<Vec<f64>, DeviceError>,
{
    let mut best_multiplier = start;
    let mut best_rate = 0.0;
    let mut steps = Vec::new();
    let mut multiplier = start;

    while multiplier <= max_multiplier {
        let samples = measure(multiplier)?;
        if samples.is_empty() {
            break;
        }

        let rate = median(&samples);
        let tolerance = config
            .plateau_tolerance
            .max(relative_std_dev(&samples) * config.min_delta_scale);
        let accepted = rate > best_rate * (1.0 + tolerance);
        steps.push(AutotuneStep {
            multiplier,
            median_rate: rate,
            accepted,
        });

        if !accepted {
            break;
        }
        best_rate = rate;
        best_multiplier = multiplier;
        multiplier += config.step;
    }

    Ok(AutotuneOutcome {
        best_multiplier,
        best_rate,
        steps,
    })
}
