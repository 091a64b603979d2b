//! GPU调度器集成测试
//!
//! 使用虚拟设备验证：
//! - 内核摘要与CPU参考实现逐字节一致
//! - 流水线调度在两种取回方式下都能找到有效 nonce
//! - 搜索空间耗尽时返回错误

use ducominer_core::ducos1::{UNSOLVABLE_DIGEST_HEX, write_decimal, MAX_NONCE_DIGITS};
use ducominer_core::{candidate_digest, verify_nonce, BackendKind, CoreError, DeviceCapabilities, Job, SearchEngine};
use ducominer_g_opencl_core::kernel::host_digest;
use ducominer_g_opencl_core::{GpuBatchScheduler, RetrievalMode, SchedulerConfig, VirtualDevice};

fn small_caps() -> DeviceCapabilities {
    DeviceCapabilities {
        max_work_group_size: 64,
        max_work_items_dim0: 64,
        compute_units: 2,
    }
}

fn fixed_config(multiplier: f64) -> SchedulerConfig {
    SchedulerConfig {
        batch_multiplier: Some(multiplier),
        ..SchedulerConfig::default()
    }
}

#[test]
fn test_kernel_digest_matches_cpu_reference() {
    // 覆盖单块和双块填充：40 字节的真实 last_hash 和 70 字节上限
    let prefixes = [
        String::new(),
        "test".to_string(),
        "7a3f1c9be02d44e5a1b6c8d9e0f1a2b3c4d5e6f7".to_string(),
        "x".repeat(54),
        "y".repeat(70),
    ];
    let mut digits = [0u8; MAX_NONCE_DIGITS];

    for prefix in &prefixes {
        for nonce in [0u32, 9, 10, 99_999, 4_294_967_295] {
            let mut message = prefix.as_bytes().to_vec();
            message.extend_from_slice(write_decimal(nonce, &mut digits));
            assert_eq!(
                host_digest(&message),
                candidate_digest(prefix, nonce),
                "前缀长度 {} nonce {} 的摘要不一致",
                prefix.len(),
                nonce
            );
        }
    }
}

#[test]
fn test_virtual_scheduler_finds_nonce_across_batches() {
    let last_hash = "4d2c1b0a99887766554433221100ffeeddccbbaa";
    let job = Job::new(last_hash, candidate_digest(last_hash, 1_777), 20).unwrap();

    for mapping in [true, false] {
        let device = VirtualDevice::new(small_caps(), mapping).unwrap();
        let mut scheduler = GpuBatchScheduler::new(device, BackendKind::Virtual, fixed_config(2.0)).unwrap();
        let expected_mode = if mapping { RetrievalMode::Mapped } else { RetrievalMode::Copied };
        assert_eq!(scheduler.retrieval_mode(), expected_mode);

        let share = scheduler.solve(&job).unwrap();
        assert_eq!(share.nonce, 1_777);
        assert!(verify_nonce(&job, share.nonce));
        assert!(share.hashrate > 0.0);
        assert!(scheduler.last_stats().batches > 1, "难度 20 应该跨越多个批次");
    }
}

#[test]
fn test_virtual_scheduler_long_prefix_two_blocks() {
    let last_hash = "z".repeat(70);
    let job = Job::new(last_hash.clone(), candidate_digest(&last_hash, 42), 1).unwrap();
    let device = VirtualDevice::new(small_caps(), true).unwrap();
    let mut scheduler = GpuBatchScheduler::new(device, BackendKind::Virtual, fixed_config(1.0)).unwrap();
    assert_eq!(scheduler.solve(&job).unwrap().nonce, 42);
}

#[test]
fn test_virtual_scheduler_exhausts() {
    let job = Job::from_hex("test", UNSOLVABLE_DIGEST_HEX, 3).unwrap();
    let device = VirtualDevice::new(small_caps(), true).unwrap();
    let mut scheduler = GpuBatchScheduler::new(device, BackendKind::Virtual, fixed_config(2.0)).unwrap();

    match scheduler.solve(&job) {
        Err(CoreError::Exhausted { checked, .. }) => assert_eq!(checked, 301),
        other => panic!("期望搜索空间耗尽，实际 {:?}", other),
    }
}

#[test]
fn test_virtual_scheduler_autotunes_then_solves_repeatedly() {
    let device = VirtualDevice::new(small_caps(), true).unwrap();
    let config = SchedulerConfig {
        autotune: ducominer_g_opencl_core::AutotuneConfig::new(Some(2), None),
        ..SchedulerConfig::default()
    };
    let mut scheduler = GpuBatchScheduler::new(device, BackendKind::Virtual, config).unwrap();

    for (index, nonce) in [5u32, 250, 99].into_iter().enumerate() {
        let last_hash = format!("job{}", index);
        let job = Job::new(last_hash.clone(), candidate_digest(&last_hash, nonce), 3).unwrap();
        assert_eq!(scheduler.solve(&job).unwrap().nonce, nonce);
    }
    assert!(scheduler.is_autotuned());
    let plan = scheduler.plan();
    assert_eq!(plan.batch_size % plan.work_group_size, 0);
    assert!(plan.batch_size <= small_caps().batch_limit());
}
