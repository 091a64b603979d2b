//! 基础类型定义

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SHA1 摘要长度
pub const DIGEST_LEN: usize = 20;

/// last_hash 的最大长度（内核消息缓冲区为 80 字节，需要留出 nonce 位数）
pub const MAX_LAST_HASH_LEN: usize = 70;

/// 每单位难度对应的 nonce 数量
pub const NONCES_PER_DIFFICULTY: u64 = 100;

/// 矿池下发的挖矿任务
///
/// 构造后不可变；nonce 搜索范围为闭区间 `[0, 100 * difficulty]`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    last_hash: String,
    #[serde(with = "hex::serde")]
    expected_digest: [u8; DIGEST_LEN],
    difficulty: u64,
}

impl Job {
    /// 创建新任务，校验所有字段
    pub fn new(
        last_hash: impl Into<String>,
        expected_digest: [u8; DIGEST_LEN],
        difficulty: u64,
    ) -> Result<Self, CoreError> {
        let last_hash = last_hash.into();

        if !last_hash.is_ascii() {
            return Err(CoreError::invalid_job("last_hash 含有非 ASCII 字符"));
        }
        if last_hash.len() > MAX_LAST_HASH_LEN {
            return Err(CoreError::invalid_job(format!(
                "last_hash 长度 {} 超过上限 {}",
                last_hash.len(),
                MAX_LAST_HASH_LEN
            )));
        }
        if difficulty == 0 {
            return Err(CoreError::invalid_job("难度必须大于 0"));
        }
        difficulty
            .checked_mul(NONCES_PER_DIFFICULTY)
            .filter(|max| *max <= u32::MAX as u64)
            .ok_or_else(|| CoreError::invalid_job(format!("难度 {} 超出 u32 nonce 范围", difficulty)))?;

        Ok(Self {
            last_hash,
            expected_digest,
            difficulty,
        })
    }

    /// 从十六进制摘要创建任务
    pub fn from_hex(last_hash: impl Into<String>, expected_hex: &str, difficulty: u64) -> Result<Self, CoreError> {
        let digest = crate::ducos1::decode_digest(expected_hex)?;
        Self::new(last_hash, digest, difficulty)
    }

    /// 上一个区块哈希（消息前缀）
    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// 目标摘要
    pub fn expected_digest(&self) -> &[u8; DIGEST_LEN] {
        &self.expected_digest
    }

    /// 目标摘要的十六进制形式
    pub fn expected_hex(&self) -> String {
        hex::encode(self.expected_digest)
    }

    pub fn difficulty(&self) -> u64 {
        self.difficulty
    }

    /// 最大 nonce（包含）
    pub fn max_nonce(&self) -> u32 {
        (self.difficulty * NONCES_PER_DIFFICULTY) as u32
    }

    /// nonce 上界（不包含），即搜索空间大小
    pub fn nonce_limit(&self) -> u64 {
        self.difficulty * NONCES_PER_DIFFICULTY + 1
    }
}

/// 找到的有效份额
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Share {
    /// 有效 nonce
    pub nonce: u32,
    /// 算力 (H/s)
    pub hashrate: f64,
    /// 计算耗时（秒）
    pub compute_time: f64,
}

impl Share {
    /// 根据已检查的候选数量和耗时创建份额
    ///
    /// 耗时为零时按 1 纳秒计算，保证算力始终为正。
    pub fn from_work(nonce: u32, hashes: u64, elapsed: Duration) -> Self {
        let seconds = elapsed.as_secs_f64().max(1e-9);
        Self {
            nonce,
            hashrate: hashes.max(1) as f64 / seconds,
            compute_time: elapsed.as_secs_f64(),
        }
    }
}

/// GPU 设备能力，初始化时读取一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// 最大工作组大小
    pub max_work_group_size: usize,
    /// 第 0 维最大工作项数
    pub max_work_items_dim0: usize,
    /// 计算单元数量
    pub compute_units: usize,
}

impl DeviceCapabilities {
    /// 单批次的工作项上限
    pub fn batch_limit(&self) -> usize {
        self.max_work_items_dim0 * self.compute_units.max(1) * 8
    }
}

/// 批处理计划
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub work_group_size: usize,
    pub batch_multiplier: f64,
    pub batch_size: usize,
}

impl BatchPlan {
    /// 创建批处理计划，批大小必须是工作组大小的整数倍
    pub fn new(work_group_size: usize, batch_multiplier: f64, batch_size: usize) -> Result<Self, CoreError> {
        if work_group_size == 0 {
            return Err(CoreError::config("工作组大小必须大于 0"));
        }
        if batch_size < work_group_size || batch_size % work_group_size != 0 {
            return Err(CoreError::config(format!(
                "批大小 {} 必须是工作组大小 {} 的正整数倍",
                batch_size, work_group_size
            )));
        }
        Ok(Self {
            work_group_size,
            batch_multiplier,
            batch_size,
        })
    }

    /// 一次内核调用的全局工作项数量
    pub fn global_size(&self, count: usize) -> usize {
        let groups = (count + self.work_group_size - 1) / self.work_group_size;
        (groups * self.work_group_size).max(self.work_group_size)
    }
}
