//! 后端选择
//!
//! 启动时探测一次：优先加速实现，用自检向量验证，
//! 被禁用或自检失败时回退到顺序实现并记录原因。

use crate::hasher::{search_prefix, search_sequential, SearchOutcome};
use crate::throttle::Throttle;
use crate::BACKEND_ENV;
use ducominer_core::{self_test_job, verify_nonce, BackendKind, CoreError, Job};
use std::sync::OnceLock;
use tracing::{info, warn};

/// CPU 哈希后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashBackend {
    Accelerated,
    Sequential,
}

impl HashBackend {
    /// 对应的后端类型
    pub fn kind(&self) -> BackendKind {
        match self {
            HashBackend::Accelerated => BackendKind::Accelerated,
            HashBackend::Sequential => BackendKind::Sequential,
        }
    }

    /// 搜索任务
    pub fn search(&self, job: &Job, throttle: &Throttle) -> SearchOutcome {
        match self {
            HashBackend::Accelerated => search_prefix(job, throttle),
            HashBackend::Sequential => search_sequential(job, throttle),
        }
    }
}

/// 后端选择结果
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSelection {
    pub backend: HashBackend,
    /// 未使用加速后端的原因
    pub fallback_reason: Option<String>,
}

impl BackendSelection {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// 用自检向量验证后端：难度 1，必须返回 nonce 0
pub fn run_self_test(backend: HashBackend) -> Result<(), CoreError> {
    let job = self_test_job()?;
    let outcome = backend.search(&job, &Throttle::unthrottled());
    match outcome.nonce {
        Some(0) if verify_nonce(&job, 0) => Ok(()),
        Some(other) => Err(CoreError::self_test(format!(
            "{} 返回了 nonce {}，期望 0",
            backend.kind(),
            other
        ))),
        None => Err(CoreError::self_test(format!("{} 未找到自检 nonce", backend.kind()))),
    }
}

/// 探测并选择后端，读取环境变量中的禁用开关
pub fn select_backend() -> BackendSelection {
    let opt_out = std::env::var(BACKEND_ENV)
        .ok()
        .filter(|value| value.eq_ignore_ascii_case("sequential"))
        .map(|_| format!("accelerated backend disabled by {}", BACKEND_ENV));

    let selection = decide(opt_out, || run_self_test(HashBackend::Accelerated));
    match &selection.fallback_reason {
        Some(reason) => warn!("Using sequential CPU hasher: {}", reason),
        None => info!("Using accelerated CPU hasher"),
    }
    selection
}

/// 进程级缓存的选择结果，首次调用时探测
pub fn cached_backend() -> &'static BackendSelection {
    static SELECTION: OnceLock<BackendSelection> = OnceLock::new();
    SELECTION.get_or_init(select_backend)
}

fn decide<F>(opt_out: Option<String>, self_test: F) -> BackendSelection
where
    F: FnOnce() -> Result<(), CoreError>,
{
    if let Some(reason) = opt_out {
        return BackendSelection {
            backend: HashBackend::Sequential,
            fallback_reason: Some(reason),
        };
    }

    match self_test() {
        Ok(()) => BackendSelection {
            backend: HashBackend::Accelerated,
            fallback_reason: None,
        },
        Err(e) => BackendSelection {
            backend: HashBackend::Sequential,
            fallback_reason: Some(format!("accelerated backend failed self-test: {}", e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_backends_pass_self_test() {
        assert!(run_self_test(HashBackend::Accelerated).is_ok());
        assert!(run_self_test(HashBackend::Sequential).is_ok());
    }

    #[test]
    fn test_self_test_failure_falls_back() {
        let selection = decide(None, || Err(CoreError::self_test("wrong nonce")));
        assert_eq!(selection.backend, HashBackend::Sequential);
        assert!(selection.fallback_reason.unwrap().contains("wrong nonce"));
    }

    #[test]
    fn test_opt_out_skips_self_test() {
        let selection = decide(Some("disabled".to_string()), || panic!("不应该运行自检"));
        assert_eq!(selection.backend, HashBackend::Sequential);
        assert!(selection.is_fallback());
    }

    #[test]
    fn test_healthy_probe_selects_accelerated() {
        let selection = decide(None, || Ok(()));
        assert_eq!(selection.backend, HashBackend::Accelerated);
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn test_cached_backend_is_stable() {
        let first = cached_backend() as *const BackendSelection;
        let second = cached_backend() as *const BackendSelection;
        assert_eq!(first, second);
    }
}
