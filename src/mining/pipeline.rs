//! 任务预取管道
//!
//! 后台任务从矿池会话拉取任务放入深度为 2 的有界队列，计算线程在本地消费。

use crate::error::{MiningError, PoolError, WorkError};
use ducominer_core::Job;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// 队列深度
pub const PREFETCH_LIMIT: usize = 2;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub depth: usize,
    /// 队列满时每次放入的等待时间
    pub put_timeout: Duration,
    /// 收到畸形任务后的退避
    pub malformed_backoff: Duration,
    /// 消费者每次等待的时间
    pub wait_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth: PREFETCH_LIMIT,
            put_timeout: Duration::from_secs(1),
            malformed_backoff: Duration::from_secs(1),
            wait_timeout: Duration::from_secs(10),
        }
    }
}

/// 队列中的任务
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    /// 任务请求的往返延迟
    pub rtt: Duration,
    pub fetched_at: Instant,
}

/// 任务管道
pub struct JobPipeline {
    receiver: mpsc::Receiver<QueuedJob>,
    error: Arc<Mutex<Option<PoolError>>>,
    handle: JoinHandle<()>,
    wait_timeout: Duration,
}

impl JobPipeline {
    /// 启动预取任务，`fetch` 每次调用请求一个任务
    pub fn spawn<F, Fut>(fetch: F, config: PipelineConfig) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(Job, Duration), PoolError>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(config.depth.max(1));
        let error = Arc::new(Mutex::new(None));
        let error_slot = error.clone();
        let wait_timeout = config.wait_timeout;

        let handle = tokio::spawn(async move {
            loop {
                let (job, rtt) = match fetch().await {
                    Ok(fetched) => fetched,
                    Err(PoolError::MalformedJob { raw }) => {
                        warn!("Pool returned an unusable job: {:?}, retrying", raw);
                        tokio::time::sleep(config.malformed_backoff).await;
                        continue;
                    }
                    Err(e) => {
                        error!("Job prefetch stopped: {}", e);
                        *error_slot.lock().await = Some(e);
                        return;
                    }
                };

                let mut item = QueuedJob {
                    job,
                    rtt,
                    fetched_at: Instant::now(),
                };
                // 队列满时保留当前任务重试放入
                loop {
                    match sender.send_timeout(item, config.put_timeout).await {
                        Ok(()) => break,
                        Err(SendTimeoutError::Timeout(returned)) => {
                            debug!("Job queue full, holding prefetched job");
                            item = returned;
                        }
                        Err(SendTimeoutError::Closed(_)) => return,
                    }
                }
            }
        });

        Self {
            receiver,
            error,
            handle,
            wait_timeout,
        }
    }

    /// 等待一次，超时且没有记录错误时返回 None
    pub async fn try_next_job(&mut self, wait: Duration) -> Result<Option<QueuedJob>, MiningError> {
        match timeout(wait, self.receiver.recv()).await {
            Ok(Some(job)) => Ok(Some(job)),
            Ok(None) => match self.error.lock().await.clone() {
                Some(e) => Err(e.into()),
                None => Err(WorkError::QueueClosed.into()),
            },
            Err(_) => match self.error.lock().await.clone() {
                Some(e) => Err(e.into()),
                None => Ok(None),
            },
        }
    }

    /// 等待下一个任务，预取出错时返回该错误
    pub async fn next_job(&mut self) -> Result<QueuedJob, MiningError> {
        loop {
            if let Some(job) = self.try_next_job(self.wait_timeout).await? {
                return Ok(job);
            }
            debug!("Still waiting for a job from the pool");
        }
    }

    pub async fn last_error(&self) -> Option<PoolError> {
        self.error.lock().await.clone()
    }

    /// 队列中已就绪的任务数
    pub fn ready(&self) -> usize {
        self.receiver.len()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for JobPipeline {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ducominer_core::candidate_digest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(nonce: u32) -> Job {
        Job::from_hex("ABC", &hex::encode(candidate_digest("ABC", nonce)), 1).unwrap()
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            depth: PREFETCH_LIMIT,
            put_timeout: Duration::from_millis(20),
            malformed_backoff: Duration::from_millis(10),
            wait_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_full_queue_keeps_job_instead_of_refetching() {
        let fetched = Arc::new(AtomicUsize::new(0));
        let counter = fetched.clone();
        let mut pipeline = JobPipeline::spawn(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok((job(n as u32), Duration::from_millis(5))) }
            },
            fast_config(),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        // 队列中两个，手上一个
        assert_eq!(fetched.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.ready(), 2);

        let first = pipeline.next_job().await.unwrap();
        assert_eq!(first.job.expected_digest(), &candidate_digest("ABC", 0));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fetched.load(Ordering::SeqCst), 4);

        let second = pipeline.next_job().await.unwrap();
        let third = pipeline.next_job().await.unwrap();
        assert_eq!(second.job.expected_digest(), &candidate_digest("ABC", 1));
        assert_eq!(third.job.expected_digest(), &candidate_digest("ABC", 2));
    }

    #[tokio::test]
    async fn test_malformed_job_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut pipeline = JobPipeline::spawn(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(PoolError::MalformedJob {
                            raw: "NO,Too many requests".to_string(),
                        })
                    } else {
                        Ok((job(7), Duration::from_millis(1)))
                    }
                }
            },
            fast_config(),
        );

        let queued = pipeline.next_job().await.unwrap();
        assert_eq!(queued.job.expected_digest(), &candidate_digest("ABC", 7));
        assert!(pipeline.last_error().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_to_consumer() {
        let mut pipeline = JobPipeline::spawn(
            || async {
                Err(PoolError::ConnectionClosed {
                    address: "127.0.0.1:2811".to_string(),
                })
            },
            fast_config(),
        );

        let err = pipeline.next_job().await.unwrap_err();
        assert!(matches!(err, MiningError::Pool(PoolError::ConnectionClosed { .. })));
    }

    #[tokio::test]
    async fn test_get_times_out_without_error() {
        let mut pipeline = JobPipeline::spawn(
            || std::future::pending::<Result<(Job, Duration), PoolError>>(),
            fast_config(),
        );

        let started = Instant::now();
        let result = pipeline.try_next_job(Duration::from_millis(50)).await.unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));

        pipeline.stop();
        let err = pipeline.try_next_job(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, MiningError::Work(WorkError::QueueClosed)));
    }
}
