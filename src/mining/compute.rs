use crate::error::{MiningError, WorkError};
use ducominer_core::{BackendKind, CoreError, Job, SearchEngine, Share};
use tokio::sync::mpsc;
use tracing::{debug, info};

enum ComputeRequest {
    Solve(Job),
    SetIntensity(u8),
}

/// 专用计算线程，独占搜索引擎 (GPU 时独占设备队列)
pub struct ComputeWorker {
    requests: mpsc::Sender<ComputeRequest>,
    results: mpsc::Receiver<Result<Share, CoreError>>,
    backend: BackendKind,
    description: String,
}

impl ComputeWorker {
    pub fn spawn(id: usize, mut engine: Box<dyn SearchEngine>) -> Result<Self, MiningError> {
        let (request_tx, mut request_rx) = mpsc::channel::<ComputeRequest>(1);
        let (result_tx, result_rx) = mpsc::channel(1);
        let backend = engine.backend();
        let description = engine.describe();

        std::thread::Builder::new()
            .name(format!("compute-{}", id))
            .spawn(move || {
                while let Some(request) = request_rx.blocking_recv() {
                    match request {
                        ComputeRequest::Solve(job) => {
                            let result = engine.solve(&job);
                            if result_tx.blocking_send(result).is_err() {
                                break;
                            }
                        }
                        ComputeRequest::SetIntensity(intensity) => engine.set_intensity(intensity),
                    }
                }
                debug!("Compute thread {} exiting", id);
            })
            .map_err(|e| WorkError::ComputeUnavailable {
                reason: format!("failed to spawn compute thread: {}", e),
            })?;

        info!("Worker {} computing on {}", id, description);

        Ok(Self {
            requests: request_tx,
            results: result_rx,
            backend,
            description,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// 在计算线程上求解，结果返回前不会接受下一个任务
    pub async fn solve(&mut self, job: Job) -> Result<Share, MiningError> {
        self.requests
            .send(ComputeRequest::Solve(job))
            .await
            .map_err(|_| unavailable())?;

        match self.results.recv().await {
            Some(result) => result.map_err(MiningError::from),
            None => Err(unavailable()),
        }
    }

    pub async fn set_intensity(&self, intensity: u8) -> Result<(), MiningError> {
        self.requests
            .send(ComputeRequest::SetIntensity(intensity))
            .await
            .map_err(|_| unavailable())
    }
}

fn unavailable() -> MiningError {
    WorkError::ComputeUnavailable {
        reason: "compute thread stopped".to_string(),
    }
    .into()
}
