use super::PoolEndpoint;
use crate::error::PoolError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// 重试等待的最大倍数
pub const MAX_BACKOFF_ATTEMPT: u32 = 60;

/// 发现服务的 JSON 响应
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryResponse {
    pub success: bool,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// 一次成功的发现结果
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPool {
    pub endpoint: PoolEndpoint,
    pub name: Option<String>,
}

/// 第 attempt 次失败后的等待时间
pub fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(2 * u64::from(attempt.clamp(1, MAX_BACKOFF_ATTEMPT)))
}

/// 矿池发现客户端
pub struct PoolDiscovery {
    client: reqwest::Client,
    url: String,
}

impl PoolDiscovery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PoolError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PoolError::DiscoveryFailed {
                url: url.clone(),
                error: e.to_string(),
            })?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 请求一次发现服务
    pub async fn fetch(&self) -> Result<DiscoveredPool, PoolError> {
        self.request().await.map_err(|failure| PoolError::DiscoveryFailed {
            url: self.url.clone(),
            error: failure.into_message(),
        })
    }

    async fn request(&self) -> Result<DiscoveredPool, Failure> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Failure::Transport(e.to_string()))?;

        let body: DiscoveryResponse = response
            .json()
            .await
            .map_err(|e| Failure::Transport(e.to_string()))?;

        if let Some(message) = body.message.filter(|_| !body.success) {
            return Err(Failure::PoolMessage(message));
        }
        if !body.success {
            return Err(Failure::Transport("discovery reported success=false".to_string()));
        }

        match (body.ip, body.port) {
            (Some(ip), Some(port)) if !ip.is_empty() => Ok(DiscoveredPool {
                endpoint: PoolEndpoint::new(ip, port),
                name: body.name,
            }),
            _ => Err(Failure::Transport("response is missing ip or port".to_string())),
        }
    }

    /// 持续重试直到拿到可用矿池
    pub async fn discover(&self) -> PoolEndpoint {
        let mut attempt: u32 = 1;
        loop {
            match self.request().await {
                Ok(pool) => {
                    info!(
                        "Discovered pool {} ({})",
                        pool.endpoint,
                        pool.name.as_deref().unwrap_or("unnamed")
                    );
                    return pool.endpoint;
                }
                Err(failure) => {
                    let delay = backoff_for(attempt);
                    match failure {
                        Failure::PoolMessage(message) => {
                            warn!("Pool discovery: {}, retrying in {}s", message, delay.as_secs())
                        }
                        Failure::Transport(e) => error!(
                            "Pool discovery from {} failed: {}, retrying in {}s",
                            self.url,
                            e,
                            delay.as_secs()
                        ),
                    }
                    tokio::time::sleep(delay).await;
                    attempt = (attempt + 1).min(MAX_BACKOFF_ATTEMPT);
                }
            }
        }
    }
}

enum Failure {
    /// 发现服务返回的提示信息
    PoolMessage(String),
    Transport(String),
}

impl Failure {
    fn into_message(self) -> String {
        match self {
            Failure::PoolMessage(message) | Failure::Transport(message) => message,
        }
    }
}
