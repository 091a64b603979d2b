//! 批处理规划

use ducominer_core::{BatchPlan, CoreError, DeviceCapabilities, DeviceError};
use tracing::warn;

/// 优先使用的工作组大小
pub const PREFERRED_WORK_GROUP_SIZES: [usize; 5] = [1024, 512, 256, 128, 64];

/// 自动调优倍数上限
pub const MAX_BATCH_MULTIPLIER: f64 = 60.0;

/// 确定工作组大小
///
/// 未指定时取首个不超过 `min(max_work_group_size, max_work_items_dim0)` 的优先值；
/// 指定值超过设备上限时截断并告警，0 为配置错误。
pub fn resolve_work_group_size(
    caps: &DeviceCapabilities,
    requested: Option<usize>,
) -> Result<usize, DeviceError> {
    let max_allowed = caps.max_work_group_size.min(caps.max_work_items_dim0);
    if max_allowed == 0 {
        return Err(DeviceError::invalid_configuration("设备报告的最大工作组大小为 0"));
    }

    let Some(requested) = requested else {
        return Ok(PREFERRED_WORK_GROUP_SIZES
            .iter()
            .copied()
            .find(|size| *size <= max_allowed)
            .unwrap_or(max_allowed));
    };

    if requested == 0 {
        return Err(DeviceError::invalid_configuration("工作组大小必须是正整数"));
    }
    if requested > max_allowed {
        warn!(
            "Requested work size {} exceeds device limit {}; using {} instead",
            requested, max_allowed, max_allowed
        );
    }
    Ok(requested.min(max_allowed))
}

/// 给定倍数下的批大小，始终为工作组大小的整数倍
pub fn batch_size_for(caps: &DeviceCapabilities, work_group_size: usize, multiplier: f64) -> usize {
    let raw = (work_group_size as f64 * caps.compute_units as f64 * multiplier) as usize;
    let clamped = raw.max(work_group_size).min(caps.batch_limit());
    let groups = (clamped / work_group_size).max(1);
    groups * work_group_size
}

/// 生成批处理计划
pub fn plan_batch(caps: &DeviceCapabilities, work_group_size: usize, multiplier: f64) -> Result<BatchPlan, CoreError> {
    BatchPlan::new(
        work_group_size,
        multiplier,
        batch_size_for(caps, work_group_size, multiplier),
    )
}

/// 自动调优倍数上限
///
/// 配置了上限时截断到 `[1, 60]`，否则为 `min(max_work_items_dim0 * 8 / wg, 60)`，至少为 1。
pub fn max_autotune_multiplier(caps: &DeviceCapabilities, work_group_size: usize, configured: Option<f64>) -> f64 {
    if let Some(limit) = configured {
        return limit.clamp(1.0, MAX_BATCH_MULTIPLIER);
    }
    if work_group_size == 0 || caps.max_work_items_dim0 == 0 {
        return MAX_BATCH_MULTIPLIER;
    }
    let theoretical = (caps.max_work_items_dim0 * 8) as f64 / work_group_size as f64;
    theoretical.min(MAX_BATCH_MULTIPLIER).max(1.0)
}
