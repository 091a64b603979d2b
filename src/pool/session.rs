use super::protocol::{
    self, FeedbackStatus, FEEDBACK_READ_LIMIT, JOB_READ_LIMIT, MOTD_READ_LIMIT, VERSION_READ_LIMIT,
};
use super::{PoolEndpoint, StartDifficulty};
use crate::config::PROTOCOL_VERSION;
use crate::error::PoolError;
use ducominer_core::{Job, Share};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 与矿池的 TCP 会话
///
/// 请求和响应通过内部互斥锁串行化，预取任务与份额提交不会在连接上交错。
pub struct PoolSession {
    endpoint: PoolEndpoint,
    stream: Mutex<TcpStream>,
    timeout: Duration,
    pool_version: String,
}

impl PoolSession {
    /// 建立连接并读取矿池版本
    pub async fn connect(endpoint: &PoolEndpoint, io_timeout: Duration) -> Result<Self, PoolError> {
        let address = endpoint.to_string();
        let mut stream = match timeout(io_timeout, TcpStream::connect((endpoint.host.as_str(), endpoint.port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(PoolError::ConnectionFailed {
                    address,
                    error: e.to_string(),
                })
            }
            Err(_) => {
                return Err(PoolError::Timeout {
                    address,
                    operation: "connect".to_string(),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", endpoint, e);
        }

        let pool_version = read_response(&mut stream, endpoint, VERSION_READ_LIMIT, io_timeout, "version").await?;
        let pool_version = pool_version.trim().to_string();

        if protocol::is_newer_version(&pool_version, PROTOCOL_VERSION) {
            warn!(
                "Pool {} runs protocol {} which is newer than this client ({}), consider updating",
                endpoint, pool_version, PROTOCOL_VERSION
            );
        } else {
            info!("Connected to pool {} (server version {})", endpoint, pool_version);
        }

        Ok(Self {
            endpoint: endpoint.clone(),
            stream: Mutex::new(stream),
            timeout: io_timeout,
            pool_version,
        })
    }

    pub fn endpoint(&self) -> &PoolEndpoint {
        &self.endpoint
    }

    pub fn pool_version(&self) -> &str {
        &self.pool_version
    }

    /// 获取矿池公告
    pub async fn motd(&self) -> Result<String, PoolError> {
        let (motd, _) = self.exchange("MOTD", MOTD_READ_LIMIT, "motd").await?;
        Ok(motd)
    }

    /// 请求一个新任务，返回任务和往返延迟
    pub async fn request_job(
        &self,
        username: &str,
        start_diff: StartDifficulty,
        mining_key: &str,
        iot: Option<&str>,
    ) -> Result<(Job, Duration), PoolError> {
        let request = protocol::encode_job_request(username, start_diff, mining_key, iot);
        let (raw, rtt) = self.exchange(&request, JOB_READ_LIMIT, "job").await?;
        let job = protocol::parse_job(&raw)?;
        debug!(
            "Job from {}: {} diff {} ({} ms)",
            self.endpoint,
            job.last_hash(),
            job.difficulty(),
            rtt.as_millis()
        );
        Ok((job, rtt))
    }

    /// 提交份额，返回矿池反馈和往返延迟
    pub async fn submit_share(
        &self,
        share: &Share,
        label: &str,
        identifier: &str,
        rig_id: u32,
    ) -> Result<(FeedbackStatus, Duration), PoolError> {
        let message = protocol::encode_share(share, label, identifier, rig_id);
        let (raw, rtt) = self.exchange(&message, FEEDBACK_READ_LIMIT, "submit").await?;
        Ok((protocol::parse_feedback(&raw), rtt))
    }

    async fn exchange(&self, message: &str, limit: usize, operation: &str) -> Result<(String, Duration), PoolError> {
        let mut stream = self.stream.lock().await;
        let started = Instant::now();

        match timeout(self.timeout, stream.write_all(message.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PoolError::ConnectionFailed {
                    address: self.endpoint.to_string(),
                    error: e.to_string(),
                })
            }
            Err(_) => {
                return Err(PoolError::Timeout {
                    address: self.endpoint.to_string(),
                    operation: operation.to_string(),
                })
            }
        }

        let response = read_response(&mut stream, &self.endpoint, limit, self.timeout, operation).await?;
        Ok((response, started.elapsed()))
    }
}

/// 单次有界读取，去掉行尾换行
async fn read_response(
    stream: &mut TcpStream,
    endpoint: &PoolEndpoint,
    limit: usize,
    io_timeout: Duration,
    operation: &str,
) -> Result<String, PoolError> {
    let mut buf = vec![0u8; limit];
    let read = match timeout(io_timeout, stream.read(&mut buf)).await {
        Ok(Ok(read)) => read,
        Ok(Err(e)) => {
            return Err(PoolError::ConnectionFailed {
                address: endpoint.to_string(),
                error: e.to_string(),
            })
        }
        Err(_) => {
            return Err(PoolError::Timeout {
                address: endpoint.to_string(),
                operation: operation.to_string(),
            })
        }
    };

    if read == 0 {
        return Err(PoolError::ConnectionClosed {
            address: endpoint.to_string(),
        });
    }

    let text = std::str::from_utf8(&buf[..read]).map_err(|e| PoolError::ProtocolError {
        address: endpoint.to_string(),
        error: format!("{} response is not UTF-8: {}", operation, e),
    })?;

    Ok(text.trim_end_matches('\n').to_string())
}
