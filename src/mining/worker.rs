//! 挖矿工作单元: 一个矿池会话循环加一个专用计算线程

use crate::config::MinerConfig;
use crate::error::{MiningError, RecoveryStrategy, WorkError};
use crate::mining::compute::ComputeWorker;
use crate::mining::hashmeter::{log_share, Hashmeter, LocalCounters, MinerStatus, StatusCache};
use crate::mining::intensity::IntensityTuner;
use crate::mining::pipeline::{JobPipeline, PipelineConfig};
use crate::monitoring::TemperatureProbe;
use crate::pool::{FeedbackStatus, PoolDiscovery, PoolEndpoint, PoolSession, PoolSwitcher, SwitchDecision};
use ducominer_core::{verify_nonce, CoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// rig 会话 ID 的上限 (含)
pub const MAX_RIG_ID: u32 = 2811;

/// 决定连接哪个矿池，多个工作单元同时需要时只发现一次
pub struct EndpointResolver {
    static_endpoint: Option<PoolEndpoint>,
    discovery: PoolDiscovery,
    switcher: Arc<PoolSwitcher>,
    discovering: Mutex<()>,
}

impl EndpointResolver {
    pub fn new(static_endpoint: Option<PoolEndpoint>, discovery: PoolDiscovery, switcher: Arc<PoolSwitcher>) -> Self {
        Self {
            static_endpoint,
            discovery,
            switcher,
            discovering: Mutex::new(()),
        }
    }

    pub async fn resolve(&self) -> PoolEndpoint {
        if let Some(current) = self.switcher.current().await {
            return current;
        }

        let _guard = self.discovering.lock().await;
        if let Some(current) = self.switcher.current().await {
            return current;
        }

        let endpoint = match &self.static_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => self.discovery.discover().await,
        };
        self.switcher.set_current(endpoint.clone()).await;
        endpoint
    }
}

/// 所有工作单元共享的上下文
pub struct WorkerContext {
    pub config: MinerConfig,
    /// 已解码的挖矿密钥
    pub mining_key: String,
    pub status: Arc<MinerStatus>,
    pub switcher: Arc<PoolSwitcher>,
    pub resolver: Arc<EndpointResolver>,
}

pub struct MiningWorker {
    id: usize,
    ctx: Arc<WorkerContext>,
    compute: ComputeWorker,
    tuner: IntensityTuner,
    counters: LocalCounters,
    cache: StatusCache,
    rig_id: u32,
}

impl MiningWorker {
    pub fn new(
        id: usize,
        ctx: Arc<WorkerContext>,
        compute: ComputeWorker,
        probe: Option<Box<dyn TemperatureProbe>>,
    ) -> Self {
        let intensity = ctx.config.intensity;
        let tuner = IntensityTuner::new(ctx.config.tuning.clone(), intensity, probe);
        let cache = StatusCache::new(ctx.status.clone());
        Self {
            id,
            compute,
            tuner,
            counters: LocalCounters::new(id, intensity),
            cache,
            rig_id: fastrand::u32(0..=MAX_RIG_ID),
            ctx,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn rig_id(&self) -> u32 {
        self.rig_id
    }

    /// 会话循环，只有不可恢复的错误才返回
    pub async fn run(mut self) -> Result<(), MiningError> {
        let config = &self.ctx.config;
        let io_timeout = config.socket_timeout();
        let reconnect_delay = Duration::from_secs(config.pool.reconnect_delay_secs);
        let connect_retry_delay = Duration::from_secs(config.pool.connect_retry_delay_secs);
        let max_connect_retries = config.pool.max_connect_retries.max(1);
        let mut connect_failures = 0u32;

        info!(
            "Worker {} started on {} (rig id {})",
            self.id,
            self.compute.description(),
            self.rig_id
        );

        loop {
            let endpoint = self.ctx.resolver.resolve().await;

            let session = match PoolSession::connect(&endpoint, io_timeout).await {
                Ok(session) => {
                    connect_failures = 0;
                    Arc::new(session)
                }
                Err(e) => {
                    connect_failures += 1;
                    warn!(
                        "Worker {} could not connect to {} ({}/{}): {}",
                        self.id, endpoint, connect_failures, max_connect_retries, e
                    );
                    self.ctx.switcher.record_error(&endpoint).await;
                    if connect_failures >= max_connect_retries {
                        self.ctx.switcher.failover(&endpoint).await;
                        connect_failures = 0;
                    }
                    tokio::time::sleep(connect_retry_delay).await;
                    continue;
                }
            };

            if self.id == 0 {
                match session.motd().await {
                    Ok(motd) => info!("Pool message: {}", motd.trim()),
                    Err(e) => debug!("MOTD unavailable: {}", e),
                }
            }

            match self.mine(session.clone()).await {
                Ok(()) => debug!("Worker {} leaving {}", self.id, endpoint),
                Err(e) => match e.recovery_strategy() {
                    RecoveryStrategy::Exit { .. } => {
                        self.counters.flush(&self.ctx.status);
                        return Err(e);
                    }
                    _ => {
                        error!(
                            "Worker {} lost session with {}: {}, reconnecting in {}s",
                            self.id,
                            endpoint,
                            e,
                            reconnect_delay.as_secs()
                        );
                        self.ctx.switcher.record_error(&endpoint).await;
                        self.counters.flush(&self.ctx.status);
                        tokio::time::sleep(reconnect_delay).await;
                    }
                },
            }
        }
    }

    /// 在一个会话上挖矿，需要换矿池时返回 Ok
    async fn mine(&mut self, session: Arc<PoolSession>) -> Result<(), MiningError> {
        let ctx = self.ctx.clone();
        let config = &ctx.config;
        let endpoint = session.endpoint().clone();

        let fetch_session = session.clone();
        let username = config.username.clone();
        let start_diff = config.start_diff;
        let mining_key = ctx.mining_key.clone();
        let mut pipeline = JobPipeline::spawn(
            move || {
                let session = fetch_session.clone();
                let username = username.clone();
                let mining_key = mining_key.clone();
                async move { session.request_job(&username, start_diff, &mining_key, None).await }
            },
            PipelineConfig {
                wait_timeout: config.socket_timeout(),
                ..Default::default()
            },
        );

        loop {
            if ctx.switcher.current().await.as_ref() != Some(&endpoint) {
                return Ok(());
            }

            let queued = pipeline.next_job().await?;
            ctx.switcher.record_latency(&endpoint, queued.rtt).await;
            let job = queued.job;
            let difficulty = job.difficulty();

            let share = match self.compute.solve(job.clone()).await {
                Ok(share) => share,
                Err(MiningError::Core(CoreError::Exhausted { difficulty, checked })) => {
                    warn!(
                        "Worker {} found no nonce for {} (diff {}, {} candidates)",
                        self.id,
                        job.last_hash(),
                        difficulty,
                        checked
                    );
                    self.record_anomaly();
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !verify_nonce(&job, share.nonce) {
                let anomaly = WorkError::VerificationFailed { nonce: share.nonce };
                warn!("Worker {}: {}, share discarded", self.id, anomaly);
                self.record_anomaly();
                continue;
            }

            let (feedback, rtt) = session
                .submit_share(&share, &config.client_label, &config.identifier, self.rig_id)
                .await?;

            ctx.switcher.record_latency(&endpoint, rtt).await;
            if feedback.is_accepted() {
                ctx.switcher.record_accepted(&endpoint).await;
            } else {
                ctx.switcher.record_error(&endpoint).await;
            }
            if let FeedbackStatus::Bad(reason) | FeedbackStatus::Other(reason) = &feedback {
                warn!("Worker {} share rejected by {}: {}", self.id, endpoint, reason);
            }

            self.tuner.record_share(feedback.is_accepted(), rtt);
            self.counters.record_share(&feedback, &share);
            self.cache.note_share();
            self.counters.maybe_flush(&ctx.status);

            let totals = *self.cache.get();
            log_share(self.id, &feedback, &share, difficulty, rtt, &totals);
            Hashmeter::check_milestone(&ctx.status, &totals);

            if let Some(intensity) = self.tuner.maybe_adjust() {
                self.compute.set_intensity(intensity).await?;
                self.counters.intensity = intensity;
            }

            let decision = ctx.switcher.evaluate().await;
            if decision != SwitchDecision::Stay && ctx.switcher.apply(decision).await {
                return Ok(());
            }
        }
    }

    fn record_anomaly(&mut self) {
        self.counters.record_anomaly();
        self.counters.maybe_flush(&self.ctx.status);
    }
}
