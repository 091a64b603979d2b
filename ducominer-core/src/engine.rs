//! 哈希搜索引擎特征定义

use crate::error::CoreError;
use crate::types::{Job, Share};
use crate::BackendKind;

/// 哈希搜索引擎特征
///
/// 求解是 CPU/GPU 密集的同步操作，由专用计算线程调用，
/// 因此这里不使用异步特征。
pub trait SearchEngine: Send {
    /// 后端类型
    fn backend(&self) -> BackendKind;

    /// 在 `[0, 100 * difficulty]` 内搜索任意一个有效 nonce
    ///
    /// 搜索空间耗尽时返回 [`CoreError::Exhausted`]。
    fn solve(&mut self, job: &Job) -> Result<Share, CoreError>;

    /// 调整强度（1-100），不支持节流的后端忽略
    fn set_intensity(&mut self, _intensity: u8) {}

    /// 用于日志的描述
    fn describe(&self) -> String {
        self.backend().to_string()
    }
}

impl<E: SearchEngine + ?Sized> SearchEngine for Box<E> {
    fn backend(&self) -> BackendKind {
        (**self).backend()
    }

    fn solve(&mut self, job: &Job) -> Result<Share, CoreError> {
        (**self).solve(job)
    }

    fn set_intensity(&mut self, intensity: u8) {
        (**self).set_intensity(intensity)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
