//! CPU 搜索引擎

use crate::backend::{cached_backend, HashBackend};
use crate::throttle::Throttle;
use ducominer_core::{BackendKind, CoreError, Job, SearchEngine, Share};
use tracing::trace;

/// CPU 搜索引擎，持有启动时选定的后端
#[derive(Debug, Clone)]
pub struct CpuSearchEngine {
    backend: HashBackend,
    throttle: Throttle,
    intensity: u8,
}

impl CpuSearchEngine {
    /// 使用指定后端创建引擎
    pub fn new(backend: HashBackend, intensity: u8) -> Self {
        Self {
            backend,
            throttle: Throttle::from_intensity(intensity),
            intensity,
        }
    }

    /// 使用进程级缓存的后端选择创建引擎
    pub fn with_selected_backend(intensity: u8) -> Self {
        Self::new(cached_backend().backend, intensity)
    }

    pub fn hash_backend(&self) -> HashBackend {
        self.backend
    }

    pub fn intensity(&self) -> u8 {
        self.intensity
    }

    pub fn throttle(&self) -> Throttle {
        self.throttle
    }
}

impl SearchEngine for CpuSearchEngine {
    fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    fn solve(&mut self, job: &Job) -> Result<Share, CoreError> {
        let outcome = self.backend.search(job, &self.throttle);
        trace!(
            "{} checked {} nonces in {:.3}s",
            self.backend.kind(),
            outcome.checked,
            outcome.elapsed.as_secs_f64()
        );

        match outcome.nonce {
            // nonce 0 也算检查了一个候选
            Some(nonce) => Ok(Share::from_work(nonce, nonce as u64 + 1, outcome.elapsed)),
            None => Err(CoreError::Exhausted {
                difficulty: job.difficulty(),
                checked: outcome.checked,
            }),
        }
    }

    fn set_intensity(&mut self, intensity: u8) {
        self.intensity = intensity;
        self.throttle = Throttle::from_intensity(intensity);
    }

    fn describe(&self) -> String {
        format!("{} (efficiency {})", self.backend.kind(), self.throttle.efficiency())
    }
}
