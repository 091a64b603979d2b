//! GPU 批处理调度器
//!
//! 单次求解的状态: IDLE → DISPATCHING → AWAITING_RESULT → (FOUND | EXHAUSTED | CONTINUE)。
//! 深度为 1 的软件流水线：批次 N 的结果仍在取回时，批次 N+1 已经入队。

use crate::autotune::{autotune, AutotuneConfig, DEFAULT_START_MULTIPLIER};
use crate::plan::{batch_size_for, max_autotune_multiplier, plan_batch, resolve_work_group_size};
use crate::queue::{BatchOutcome, BatchRequest, ComputeQueue, RetrievalMode};
use ducominer_core::{BackendKind, BatchPlan, CoreError, DeviceCapabilities, DeviceError, Job, SearchEngine, Share};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 调度器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 工作组大小，未指定时自动选择
    pub work_size: Option<usize>,
    /// 固定批倍数，指定后跳过自动调优
    pub batch_multiplier: Option<f64>,
    /// 自动调优倍数上限
    pub autotune_max_multiplier: Option<f64>,
    /// 自动调优采样配置
    pub autotune: AutotuneConfig,
}

/// 流水线阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Dispatched,
    Retrieving,
    Done,
}

/// 批次元数据
#[derive(Debug, Clone, Copy)]
pub struct BatchMeta {
    pub start_nonce: u32,
    pub nonce_count: u32,
    pub dispatched_at: Instant,
}

impl BatchMeta {
    /// 批次结束位置（不包含）
    pub fn end(&self) -> u64 {
        self.start_nonce as u64 + self.nonce_count as u64
    }
}

/// 流水线阶段: 在途句柄 + 批次元数据
pub struct PipelineStage<H> {
    handle: Option<H>,
    meta: BatchMeta,
    state: StageState,
}

impl<H> PipelineStage<H> {
    fn dispatched(handle: H, meta: BatchMeta) -> Self {
        Self {
            handle: Some(handle),
            meta,
            state: StageState::Dispatched,
        }
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn meta(&self) -> &BatchMeta {
        &self.meta
    }

    /// 等待取回完成，返回批次结果和从入队到完成的延迟
    fn retrieve<Q>(&mut self, queue: &mut Q) -> Result<(BatchOutcome, Duration), DeviceError>
    where
        Q: ComputeQueue<InFlight = H>,
    {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DeviceError::communication_error("pipeline stage already retrieved"))?;
        self.state = StageState::Retrieving;
        let outcome = queue.complete(handle)?;
        self.state = StageState::Done;
        Ok((outcome, self.meta.dispatched_at.elapsed()))
    }
}

/// 单次求解统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStats {
    pub batches: usize,
    pub processed: u64,
    pub average_batch_latency: Duration,
    /// 求解结束时仍在途、被排空的批次数
    pub drained: usize,
}

/// GPU 批处理调度器
pub struct GpuBatchScheduler<Q: ComputeQueue> {
    queue: Q,
    kind: BackendKind,
    capabilities: DeviceCapabilities,
    plan: BatchPlan,
    retrieval: RetrievalMode,
    config: SchedulerConfig,
    max_multiplier: f64,
    autotuned: bool,
    last_stats: SolveStats,
}

impl<Q: ComputeQueue> GpuBatchScheduler<Q> {
    /// 读取设备能力、确定工作组和初始批大小、探测取回方式
    pub fn new(mut queue: Q, kind: BackendKind, config: SchedulerConfig) -> Result<Self, CoreError> {
        let capabilities = queue.capabilities();
        let work_group_size = resolve_work_group_size(&capabilities, config.work_size)?;
        let max_multiplier = max_autotune_multiplier(&capabilities, work_group_size, config.autotune_max_multiplier);
        // 调优起点不能超过上限
        let multiplier = config
            .batch_multiplier
            .unwrap_or(DEFAULT_START_MULTIPLIER.min(max_multiplier));
        let plan = plan_batch(&capabilities, work_group_size, multiplier)?;
        let retrieval = queue.probe_retrieval();

        info!(
            "GPU {}: {} compute units, work group {}, batch {} (multiplier {}), results {}",
            queue.name(),
            capabilities.compute_units,
            plan.work_group_size,
            plan.batch_size,
            plan.batch_multiplier,
            retrieval
        );

        Ok(Self {
            queue,
            kind,
            capabilities,
            plan,
            retrieval,
            autotuned: config.batch_multiplier.is_some(),
            config,
            max_multiplier,
            last_stats: SolveStats::default(),
        })
    }

    pub fn plan(&self) -> &BatchPlan {
        &self.plan
    }

    pub fn retrieval_mode(&self) -> RetrievalMode {
        self.retrieval
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn is_autotuned(&self) -> bool {
        self.autotuned
    }

    pub fn last_stats(&self) -> &SolveStats {
        &self.last_stats
    }

    /// 每个会话调优一次，需要先上传任务数据
    fn ensure_autotuned(&mut self) -> Result<(), CoreError> {
        if self.autotuned {
            return Ok(());
        }

        let capabilities = self.capabilities;
        let work_group_size = self.plan.work_group_size;
        let samples = self.config.autotune.samples;
        let queue = &mut self.queue;

        let outcome = autotune(
            self.plan.batch_multiplier,
            self.max_multiplier,
            &self.config.autotune,
            |multiplier| {
                let count = batch_size_for(&capabilities, work_group_size, multiplier);
                let request = BatchRequest {
                    start_nonce: 0,
                    nonce_count: count as u32,
                    global_size: count,
                    local_size: work_group_size,
                    slot: 0,
                };
                let mut rates = Vec::with_capacity(samples);
                for _ in 0..samples {
                    let elapsed = queue.benchmark(&request)?;
                    if !elapsed.is_zero() {
                        rates.push(count as f64 / elapsed.as_secs_f64());
                    }
                }
                Ok(rates)
            },
        )?;

        if outcome.best_multiplier != self.plan.batch_multiplier {
            self.plan = plan_batch(&self.capabilities, work_group_size, outcome.best_multiplier)?;
            info!(
                "Auto-tuned batch multiplier to {} (batch size {}, {} samples, max {:.1})",
                self.plan.batch_multiplier, self.plan.batch_size, samples, self.max_multiplier
            );
        }
        self.autotuned = true;
        Ok(())
    }

    fn run(&mut self, job: &Job) -> Result<Share, CoreError> {
        self.queue.load_job(job.last_hash().as_bytes(), job.expected_digest())?;
        self.ensure_autotuned()?;

        let limit = job.nonce_limit();
        let batch_size = self.plan.batch_size as u64;
        let started = Instant::now();

        let mut start: u64 = 0;
        let mut slot = 0usize;
        let mut found: Option<u32> = None;
        let mut processed: u64 = 0;
        let mut stats = SolveStats::default();
        let mut total_latency = Duration::ZERO;
        let mut in_flight: Option<PipelineStage<Q::InFlight>> = None;

        loop {
            // DISPATCHING: 上一批仍在取回时先入队下一批
            let next = if found.is_none() && start < limit {
                let count = batch_size.min(limit - start);
                let request = BatchRequest {
                    start_nonce: start as u32,
                    nonce_count: count as u32,
                    global_size: self.plan.global_size(count as usize),
                    local_size: self.plan.work_group_size,
                    slot,
                };
                let meta = BatchMeta {
                    start_nonce: request.start_nonce,
                    nonce_count: request.nonce_count,
                    dispatched_at: Instant::now(),
                };
                let handle = match self.queue.dispatch(&request, self.retrieval) {
                    Ok(handle) => handle,
                    Err(e) => {
                        self.drain(in_flight.take());
                        return Err(e.into());
                    }
                };
                start += count;
                slot ^= 1;
                stats.batches += 1;
                Some(PipelineStage::dispatched(handle, meta))
            } else {
                None
            };

            // AWAITING_RESULT
            if let Some(mut stage) = in_flight.take() {
                let (outcome, latency) = match stage.retrieve(&mut self.queue) {
                    Ok(retrieved) => retrieved,
                    Err(e) => {
                        self.drain(next);
                        return Err(e.into());
                    }
                };
                total_latency += latency;
                match outcome {
                    BatchOutcome::Found(nonce) => {
                        found = Some(nonce);
                        processed = nonce as u64 + 1;
                    }
                    BatchOutcome::NotFound => processed = stage.meta().end(),
                }
            }

            if found.is_some() {
                // 已入队的下一批必须排空，保证缓冲区不再被设备占用
                if let Some(mut stage) = next {
                    let (_, latency) = stage.retrieve(&mut self.queue)?;
                    total_latency += latency;
                    stats.drained += 1;
                }
                break;
            }

            match next {
                Some(stage) => in_flight = Some(stage),
                None => break,
            }
        }

        let elapsed = started.elapsed();
        stats.processed = processed;
        if stats.batches > 0 {
            stats.average_batch_latency = total_latency / stats.batches as u32;
        }
        debug!(
            "GPU solve: {} batches, average batch latency {:.2} ms, {} nonces",
            stats.batches,
            stats.average_batch_latency.as_secs_f64() * 1000.0,
            processed
        );
        self.last_stats = stats;

        match found {
            Some(nonce) => Ok(Share::from_work(nonce, processed, elapsed)),
            None => Err(CoreError::Exhausted {
                difficulty: job.difficulty(),
                checked: limit,
            }),
        }
    }

    /// 出错时排空仍在途的批次，排空本身的错误只记录
    fn drain(&mut self, stage: Option<PipelineStage<Q::InFlight>>) {
        if let Some(mut stage) = stage {
            if let Err(e) = stage.retrieve(&mut self.queue) {
                warn!("Failed to drain batch at nonce {}: {}", stage.meta().start_nonce, e);
            }
        }
    }
}

impl<Q: ComputeQueue> SearchEngine for GpuBatchScheduler<Q> {
    fn backend(&self) -> BackendKind {
        self.kind
    }

    fn solve(&mut self, job: &Job) -> Result<Share, CoreError> {
        self.run(job)
    }

    fn describe(&self) -> String {
        format!(
            "{} {} (batch {}, work group {})",
            self.kind,
            self.queue.name(),
            self.plan.batch_size,
            self.plan.work_group_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ducominer_core::types::DIGEST_LEN;

    /// 按提交顺序记录命令的队列，解固定为 `solution`
    struct RecordingQueue {
        solution: Option<u32>,
        events: Vec<String>,
        requests: Vec<BatchRequest>,
        benchmarks: usize,
    }

    impl RecordingQueue {
        fn new(solution: Option<u32>) -> Self {
            Self {
                solution,
                events: Vec::new(),
                requests: Vec::new(),
                benchmarks: 0,
            }
        }
    }

    impl ComputeQueue for RecordingQueue {
        type InFlight = BatchRequest;

        fn name(&self) -> String {
            "recording".to_string()
        }

        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities {
                max_work_group_size: 64,
                max_work_items_dim0: 64,
                compute_units: 1,
            }
        }

        fn probe_retrieval(&mut self) -> RetrievalMode {
            RetrievalMode::Copied
        }

        fn load_job(&mut self, _base: &[u8], _expected: &[u8; DIGEST_LEN]) -> Result<(), DeviceError> {
            self.events.push("load".to_string());
            Ok(())
        }

        fn dispatch(&mut self, request: &BatchRequest, _mode: RetrievalMode) -> Result<BatchRequest, DeviceError> {
            self.events.push(format!("dispatch {}", request.start_nonce));
            self.requests.push(*request);
            Ok(*request)
        }

        fn complete(&mut self, request: BatchRequest) -> Result<BatchOutcome, DeviceError> {
            self.events.push(format!("complete {}", request.start_nonce));
            let range = request.start_nonce..request.start_nonce + request.nonce_count;
            Ok(match self.solution {
                Some(nonce) if range.contains(&nonce) => BatchOutcome::Found(nonce),
                _ => BatchOutcome::NotFound,
            })
        }

        fn benchmark(&mut self, request: &BatchRequest) -> Result<Duration, DeviceError> {
            self.benchmarks += 1;
            // 每个工作项 1 微秒，加上固定 1 毫秒开销：批越大速率越高
            Ok(Duration::from_micros(1000 + request.nonce_count as u64))
        }
    }

    fn fixed_config() -> SchedulerConfig {
        SchedulerConfig {
            batch_multiplier: Some(2.0),
            ..SchedulerConfig::default()
        }
    }

    fn job(difficulty: u64) -> Job {
        Job::new("abc", [0u8; DIGEST_LEN], difficulty).unwrap()
    }

    #[test]
    fn test_next_batch_dispatched_before_previous_completes() {
        let mut scheduler = GpuBatchScheduler::new(RecordingQueue::new(Some(300)), BackendKind::Virtual, fixed_config()).unwrap();
        assert_eq!(scheduler.plan().batch_size, 128);

        let share = scheduler.solve(&job(5)).unwrap();
        assert_eq!(share.nonce, 300);

        let events = &scheduler.queue.events;
        assert_eq!(
            events,
            &vec![
                "load",
                "dispatch 0",
                "dispatch 128",
                "complete 0",
                "dispatch 256",
                "complete 128",
                "dispatch 384",
                "complete 256",
                "complete 384",
            ]
        );

        let stats = scheduler.last_stats();
        assert_eq!(stats.batches, 4);
        assert_eq!(stats.drained, 1, "命中后在途批次必须排空");
        assert_eq!(stats.processed, 301);
    }

    #[test]
    fn test_batches_cover_range_exactly() {
        let mut scheduler = GpuBatchScheduler::new(RecordingQueue::new(None), BackendKind::Virtual, fixed_config()).unwrap();
        let result = scheduler.solve(&job(5));
        assert!(matches!(result, Err(CoreError::Exhausted { difficulty: 5, checked: 501 })));

        let requests = &scheduler.queue.requests;
        let covered: u64 = requests.iter().map(|r| r.nonce_count as u64).sum();
        assert_eq!(covered, 501);
        for pair in requests.windows(2) {
            assert_eq!(pair[0].start_nonce + pair[0].nonce_count, pair[1].start_nonce);
            assert_ne!(pair[0].slot, pair[1].slot, "相邻批次应该使用不同槽位");
        }
        for request in requests {
            assert_eq!(request.global_size % 64, 0);
            assert!(request.global_size >= request.nonce_count as usize);
        }
    }

    #[test]
    fn test_single_partial_batch() {
        let mut scheduler = GpuBatchScheduler::new(RecordingQueue::new(Some(0)), BackendKind::Virtual, fixed_config()).unwrap();
        let share = scheduler.solve(&job(1)).unwrap();
        assert_eq!(share.nonce, 0);
        assert!(share.hashrate > 0.0);
        assert_eq!(scheduler.queue.requests[0].nonce_count, 101);
        assert_eq!(scheduler.queue.requests[0].global_size, 128);
    }

    #[test]
    fn test_autotune_runs_once_per_session() {
        let config = SchedulerConfig {
            autotune: AutotuneConfig::new(Some(2), None),
            ..SchedulerConfig::default()
        };
        let mut scheduler = GpuBatchScheduler::new(RecordingQueue::new(Some(10)), BackendKind::Virtual, config).unwrap();
        assert!(!scheduler.is_autotuned());

        scheduler.solve(&job(1)).unwrap();
        assert!(scheduler.is_autotuned());
        let after_first = scheduler.queue.benchmarks;
        assert!(after_first >= 2);
        // 速率随批大小单调上升，最终停在上限 8 倍
        assert_eq!(scheduler.plan().batch_multiplier, 8.0);

        scheduler.solve(&job(1)).unwrap();
        assert_eq!(scheduler.queue.benchmarks, after_first, "第二次求解不应重新调优");
    }

    #[test]
    fn test_multiplier_override_skips_autotune() {
        let mut scheduler = GpuBatchScheduler::new(RecordingQueue::new(Some(1)), BackendKind::Virtual, fixed_config()).unwrap();
        scheduler.solve(&job(1)).unwrap();
        assert_eq!(scheduler.queue.benchmarks, 0);
    }

    #[test]
    fn test_pipeline_stage_states() {
        let mut queue = RecordingQueue::new(None);
        let request = BatchRequest {
            start_nonce: 0,
            nonce_count: 64,
            global_size: 64,
            local_size: 64,
            slot: 0,
        };
        let handle = queue.dispatch(&request, RetrievalMode::Copied).unwrap();
        let mut stage = PipelineStage::dispatched(
            handle,
            BatchMeta {
                start_nonce: 0,
                nonce_count: 64,
                dispatched_at: Instant::now(),
            },
        );
        assert_eq!(stage.state(), StageState::Dispatched);
        let (outcome, _) = stage.retrieve(&mut queue).unwrap();
        assert_eq!(outcome, BatchOutcome::NotFound);
        assert_eq!(stage.state(), StageState::Done);
        assert!(stage.retrieve(&mut queue).is_err(), "同一阶段不能取回两次");
    }

    /// 在指定批次上让入队或取回失败的队列，记录入队与完成次数
    struct FailingQueue {
        inner: RecordingQueue,
        fail_dispatch_at: Option<u32>,
        fail_complete_at: Option<u32>,
        dispatched: usize,
        completed: usize,
    }

    impl FailingQueue {
        fn new(solution: Option<u32>, fail_dispatch_at: Option<u32>, fail_complete_at: Option<u32>) -> Self {
            Self {
                inner: RecordingQueue::new(solution),
                fail_dispatch_at,
                fail_complete_at,
                dispatched: 0,
                completed: 0,
            }
        }
    }

    impl ComputeQueue for FailingQueue {
        type InFlight = BatchRequest;

        fn name(&self) -> String {
            "failing".to_string()
        }

        fn capabilities(&self) -> DeviceCapabilities {
            self.inner.capabilities()
        }

        fn probe_retrieval(&mut self) -> RetrievalMode {
            RetrievalMode::Copied
        }

        fn load_job(&mut self, base: &[u8], expected: &[u8; DIGEST_LEN]) -> Result<(), DeviceError> {
            self.inner.load_job(base, expected)
        }

        fn dispatch(&mut self, request: &BatchRequest, mode: RetrievalMode) -> Result<BatchRequest, DeviceError> {
            if self.fail_dispatch_at == Some(request.start_nonce) {
                self.inner.events.push(format!("fail dispatch {}", request.start_nonce));
                return Err(DeviceError::communication_error("enqueue failed"));
            }
            self.dispatched += 1;
            self.inner.dispatch(request, mode)
        }

        fn complete(&mut self, request: BatchRequest) -> Result<BatchOutcome, DeviceError> {
            self.completed += 1;
            if self.fail_complete_at == Some(request.start_nonce) {
                self.inner.events.push(format!("fail {}", request.start_nonce));
                return Err(DeviceError::communication_error("map failed"));
            }
            self.inner.complete(request)
        }

        fn benchmark(&mut self, request: &BatchRequest) -> Result<Duration, DeviceError> {
            self.inner.benchmark(request)
        }
    }

    #[test]
    fn test_failed_retrieval_drains_next_batch() {
        let queue = FailingQueue::new(Some(900), None, Some(0));
        let mut scheduler = GpuBatchScheduler::new(queue, BackendKind::Virtual, fixed_config()).unwrap();

        let err = scheduler.solve(&job(10)).unwrap_err();
        assert!(matches!(err, CoreError::Device(_)));
        assert_eq!(
            scheduler.queue.inner.events,
            vec!["load", "dispatch 0", "dispatch 128", "fail 0", "complete 128"]
        );
        assert_eq!(scheduler.queue.dispatched, scheduler.queue.completed);

        // 槽位已释放，下一次求解不受影响
        scheduler.queue.fail_complete_at = None;
        assert_eq!(scheduler.solve(&job(10)).unwrap().nonce, 900);
        assert_eq!(scheduler.queue.dispatched, scheduler.queue.completed);
    }

    #[test]
    fn test_failed_dispatch_drains_in_flight_batch() {
        let queue = FailingQueue::new(Some(900), Some(256), None);
        let mut scheduler = GpuBatchScheduler::new(queue, BackendKind::Virtual, fixed_config()).unwrap();

        assert!(scheduler.solve(&job(10)).is_err());
        assert_eq!(
            scheduler.queue.inner.events,
            vec!["load", "dispatch 0", "dispatch 128", "complete 0", "fail dispatch 256", "complete 128"]
        );
        assert_eq!(scheduler.queue.dispatched, scheduler.queue.completed);
    }

    #[test]
    fn test_start_multiplier_respects_small_autotune_bound() {
        let config = SchedulerConfig {
            autotune_max_multiplier: Some(1.5),
            autotune: AutotuneConfig::new(Some(2), None),
            ..SchedulerConfig::default()
        };
        let mut scheduler = GpuBatchScheduler::new(RecordingQueue::new(Some(10)), BackendKind::Virtual, config).unwrap();
        assert_eq!(scheduler.plan().batch_multiplier, 1.5);

        scheduler.solve(&job(1)).unwrap();
        assert!(scheduler.is_autotuned());
        assert!(scheduler.plan().batch_multiplier <= 1.5);
    }
}
