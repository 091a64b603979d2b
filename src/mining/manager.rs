use crate::config::{BackendChoice, MinerConfig};
use crate::error::MiningError;
use crate::mining::compute::ComputeWorker;
use crate::mining::hashmeter::{Hashmeter, MinerStatus, StatusSnapshot};
use crate::mining::worker::{EndpointResolver, MiningWorker, WorkerContext};
use crate::mining::MiningState;
use crate::monitoring::{SystemTemperature, TemperatureProbe};
use crate::pool::{PoolDiscovery, PoolEndpoint, PoolSwitcher, SwitchConfig};
use crate::utils::format_hashrate;
use ducominer_core::SearchEngine;
use ducominer_g_opencl_core::{default_virtual_capabilities, open_gpu_engine, open_virtual_engine};
use ducominer_s_cpu_core::{cached_backend, CpuSearchEngine};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 挖矿管理器 - 创建引擎、启动工作单元和报告任务
pub struct MiningManager {
    config: MinerConfig,
    status: Arc<MinerStatus>,
    switcher: Arc<PoolSwitcher>,
    hashmeter: Hashmeter,
    state: Arc<RwLock<MiningState>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    fatal_sender: mpsc::UnboundedSender<MiningError>,
    fatal_receiver: Mutex<mpsc::UnboundedReceiver<MiningError>>,
}

impl MiningManager {
    pub fn new(config: MinerConfig) -> Self {
        let status = Arc::new(MinerStatus::new(config.worker_count()));
        let switcher = Arc::new(PoolSwitcher::new(SwitchConfig::from(&config.switching)));
        let hashmeter = Hashmeter::new(status.clone(), config.report_interval());
        let (fatal_sender, fatal_receiver) = mpsc::unbounded_channel();

        Self {
            config,
            status,
            switcher,
            hashmeter,
            state: Arc::new(RwLock::new(MiningState::Stopped)),
            workers: Mutex::new(Vec::new()),
            fatal_sender,
            fatal_receiver: Mutex::new(fatal_receiver),
        }
    }

    /// 按后端创建搜索引擎，设备准备失败直接返回
    pub fn build_engines(config: &MinerConfig) -> Result<Vec<Box<dyn SearchEngine>>, MiningError> {
        match config.backend {
            BackendChoice::Cpu => {
                let selection = cached_backend();
                if let Some(reason) = &selection.fallback_reason {
                    warn!("Using {} CPU backend: {}", selection.backend.kind(), reason);
                }
                Ok((0..config.threads)
                    .map(|_| Box::new(CpuSearchEngine::new(selection.backend, config.intensity)) as Box<dyn SearchEngine>)
                    .collect())
            }
            BackendChoice::Gpu => Ok(vec![open_gpu_engine(config.gpu.device, config.scheduler_config())?]),
            BackendChoice::Virtual => Ok(vec![open_virtual_engine(
                default_virtual_capabilities(),
                config.scheduler_config(),
            )?]),
        }
    }

    pub async fn start(&self) -> Result<(), MiningError> {
        *self.state.write().await = MiningState::Starting;

        let engines = match Self::build_engines(&self.config) {
            Ok(engines) => engines,
            Err(e) => {
                *self.state.write().await = MiningState::Error(e.to_string());
                return Err(e);
            }
        };

        let static_endpoint = self
            .config
            .pool
            .static_endpoint
            .as_deref()
            .map(str::parse::<PoolEndpoint>)
            .transpose()?;
        let discovery = PoolDiscovery::new(self.config.pool.discovery_url.clone(), self.config.socket_timeout())?;
        let resolver = Arc::new(EndpointResolver::new(static_endpoint, discovery, self.switcher.clone()));

        let ctx = Arc::new(WorkerContext {
            config: self.config.clone(),
            mining_key: self.config.decoded_mining_key(),
            status: self.status.clone(),
            switcher: self.switcher.clone(),
            resolver,
        });

        let mut workers = self.workers.lock().await;
        for (id, engine) in engines.into_iter().enumerate() {
            let compute = ComputeWorker::spawn(id, engine)?;
            let worker = MiningWorker::new(id, ctx.clone(), compute, self.temperature_probe());
            let fatal = self.fatal_sender.clone();

            workers.push(tokio::spawn(async move {
                let id = worker.id();
                if let Err(e) = worker.run().await {
                    error!("Worker {} stopped: {}", id, e);
                    let _ = fatal.send(e);
                }
            }));
        }

        self.hashmeter.start().await;
        *self.state.write().await = MiningState::Running;

        info!(
            "Mining as {} with {} worker(s) on {}, intensity {}",
            self.config.username,
            workers.len(),
            self.config.backend_label(),
            self.config.intensity
        );
        Ok(())
    }

    /// 等待第一个不可恢复的工作单元错误
    pub async fn wait_fatal(&self) -> Option<MiningError> {
        self.fatal_receiver.lock().await.recv().await
    }

    pub async fn stop(&self) {
        *self.state.write().await = MiningState::Stopping;

        for handle in self.workers.lock().await.drain(..) {
            handle.abort();
        }
        self.hashmeter.stop().await;

        let snapshot = self.snapshot();
        info!(
            "Mining stopped: {} accepted, {} rejected, {} blocks, {} anomalies, last hashrate {}",
            snapshot.accepted,
            snapshot.rejected,
            snapshot.blocks,
            snapshot.anomalies,
            format_hashrate(snapshot.hashrate)
        );
        *self.state.write().await = MiningState::Stopped;
    }

    pub async fn state(&self) -> MiningState {
        self.state.read().await.clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn switcher(&self) -> &Arc<PoolSwitcher> {
        &self.switcher
    }

    fn temperature_probe(&self) -> Option<Box<dyn TemperatureProbe>> {
        if !self.config.tuning.enabled || self.config.backend != BackendChoice::Cpu {
            return None;
        }
        let probe = SystemTemperature::new();
        if probe.has_sensors() {
            Some(Box::new(probe))
        } else {
            None
        }
    }
}
