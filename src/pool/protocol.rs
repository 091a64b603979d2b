//! DUCO 矿池文本协议编解码
//!
//! 所有消息都是以 `,` 分隔的 ASCII 文本，每个响应一次读取完成。

use super::StartDifficulty;
use crate::error::PoolError;
use ducominer_core::{Job, Share};

pub const SEPARATOR: char = ',';

/// 各类响应的最大读取长度
pub const VERSION_READ_LIMIT: usize = 5;
pub const JOB_READ_LIMIT: usize = 128;
pub const FEEDBACK_READ_LIMIT: usize = 128;
pub const MOTD_READ_LIMIT: usize = 512;

/// 构造任务请求: `JOB,<user>,<diff>,<key>,<iot>`
pub fn encode_job_request(
    username: &str,
    start_diff: StartDifficulty,
    mining_key: &str,
    iot: Option<&str>,
) -> String {
    format!(
        "JOB,{},{},{},{}",
        username,
        start_diff,
        mining_key,
        iot.unwrap_or_default()
    )
}

/// 解析任务响应，必须恰好三个字段
pub fn parse_job(raw: &str) -> Result<Job, PoolError> {
    let line = raw.trim_end_matches(['\n', '\r']);
    let malformed = || PoolError::MalformedJob { raw: line.to_string() };

    let fields: Vec<&str> = line.split(SEPARATOR).collect();
    if fields.len() != 3 {
        return Err(malformed());
    }

    let difficulty = fields[2].trim().parse::<u64>().map_err(|_| malformed())?;
    Job::from_hex(fields[0], fields[1].trim(), difficulty).map_err(|_| malformed())
}

/// 构造份额提交: `<nonce>,<hashrate>,<label>,<identifier>,,<rig_id>`
pub fn encode_share(share: &Share, label: &str, identifier: &str, rig_id: u32) -> String {
    format!(
        "{},{},{},{},,{}",
        share.nonce, share.hashrate, label, identifier, rig_id
    )
}

/// 矿池对份额的反馈
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackStatus {
    Good,
    Block,
    Bad(String),
    Other(String),
}

impl FeedbackStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FeedbackStatus::Good | FeedbackStatus::Block)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedbackStatus::Good => "accepted",
            FeedbackStatus::Block => "block",
            FeedbackStatus::Bad(_) | FeedbackStatus::Other(_) => "rejected",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            FeedbackStatus::Bad(reason) | FeedbackStatus::Other(reason) if !reason.is_empty() => Some(reason),
            _ => None,
        }
    }
}

pub fn parse_feedback(raw: &str) -> FeedbackStatus {
    let line = raw.trim_end_matches(['\n', '\r']);
    let (status, reason) = match line.split_once(SEPARATOR) {
        Some((status, reason)) => (status, reason),
        None => (line, ""),
    };

    match status.trim() {
        "GOOD" => FeedbackStatus::Good,
        "BLOCK" => FeedbackStatus::Block,
        "BAD" => FeedbackStatus::Bad(reason.trim().to_string()),
        _ => FeedbackStatus::Other(line.trim().to_string()),
    }
}

/// 矿池版本号是否比客户端协议版本新
pub fn is_newer_version(pool_version: &str, client_version: &str) -> bool {
    match (pool_version.trim().parse::<f64>(), client_version.parse::<f64>()) {
        (Ok(pool), Ok(client)) => pool > client,
        _ => false,
    }
}
