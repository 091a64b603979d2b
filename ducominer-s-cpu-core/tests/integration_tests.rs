//! CPU核心集成测试
//!
//! 这些测试验证CPU核心的各个组件是否正确工作，包括：
//! - 后端选择与自检
//! - 两种搜索实现的一致性
//! - 强度节流对搜索结果的影响

use ducominer_core::{candidate_digest, verify_nonce, Job, SearchEngine};
use ducominer_s_cpu_core::{run_self_test, select_backend, CpuSearchEngine, HashBackend, Throttle};

/// 创建测试用的任务，解为指定 nonce
fn create_test_job(last_hash: &str, nonce: u32, difficulty: u64) -> Job {
    Job::new(last_hash, candidate_digest(last_hash, nonce), difficulty).unwrap()
}

#[test]
fn test_selection_passes_self_test() {
    let selection = select_backend();
    // 无论选中哪个后端，它都必须能通过自检
    assert!(run_self_test(selection.backend).is_ok());
    if selection.backend == HashBackend::Accelerated {
        assert!(selection.fallback_reason.is_none());
    }
}

#[test]
fn test_backends_agree_on_realistic_jobs() {
    let last_hash = "0f8e5a2e9a51f6c0b28a4a8e6b7c2d1e3f405162";
    for nonce in [0u32, 1, 99, 1234, 49_999] {
        let job = create_test_job(last_hash, nonce, 500);
        let fast = HashBackend::Accelerated.search(&job, &Throttle::unthrottled());
        let slow = HashBackend::Sequential.search(&job, &Throttle::unthrottled());
        assert_eq!(fast.nonce, Some(nonce), "加速实现应该找到 nonce {}", nonce);
        assert_eq!(fast.nonce, slow.nonce);
        assert_eq!(fast.checked, slow.checked);
    }
}

#[test]
fn test_throttled_engine_still_finds_nonce() {
    let job = create_test_job("ABC123", 2500, 30);
    let mut engine = CpuSearchEngine::new(HashBackend::Accelerated, 20);
    let share = engine.solve(&job).unwrap();

    assert_eq!(share.nonce, 2500);
    assert!(verify_nonce(&job, share.nonce));
    // 强度 20 → 每千次暂停 3ms，2501 次至少暂停两次
    assert!(share.compute_time >= 0.006, "节流后耗时 {} 过短", share.compute_time);
}

#[test]
fn test_expected_digest_from_hex() {
    let expected = hex::encode(candidate_digest("ABC123", 0));
    let job = Job::from_hex("ABC123", &expected, 1).unwrap();
    let mut engine = CpuSearchEngine::with_selected_backend(100);
    assert_eq!(engine.solve(&job).unwrap().nonce, 0);
}
