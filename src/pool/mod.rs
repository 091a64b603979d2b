pub mod discovery;
pub mod protocol;
pub mod session;
pub mod switcher;

use crate::error::PoolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use discovery::PoolDiscovery;
pub use protocol::FeedbackStatus;
pub use session::PoolSession;
pub use switcher::{PoolSwitcher, SwitchConfig, SwitchDecision, SwitchReason};

/// 矿池地址
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
}

impl PoolEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for PoolEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PoolEndpoint {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PoolError::InvalidEndpoint { value: s.to_string() };
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

/// 起始难度档位，矿池据此分配任务难度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StartDifficulty {
    Low,
    #[default]
    Medium,
    Net,
}

impl StartDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartDifficulty::Low => "LOW",
            StartDifficulty::Medium => "MEDIUM",
            StartDifficulty::Net => "NET",
        }
    }
}

impl fmt::Display for StartDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartDifficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(StartDifficulty::Low),
            "MEDIUM" => Ok(StartDifficulty::Medium),
            "NET" => Ok(StartDifficulty::Net),
            other => Err(format!("unknown start difficulty '{}', expected LOW, MEDIUM or NET", other)),
        }
    }
}

impl TryFrom<String> for StartDifficulty {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StartDifficulty> for String {
    fn from(value: StartDifficulty) -> Self {
        value.as_str().to_string()
    }
}
