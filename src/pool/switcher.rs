//! 矿池切换器
//!
//! 按矿池记录延迟 EMA 与连续错误数，在延迟过高或错误过多时切换到测得延迟更低的矿池，
//! 没有更好的候选时要求重新发现。

use super::PoolEndpoint;
use crate::config::SwitchingSettings;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 新样本在延迟 EMA 中的权重
pub const LATENCY_EMA_WEIGHT: f64 = 0.3;

/// 保留的切换记录条数
pub const MAX_SWITCH_HISTORY: usize = 100;

/// 矿池切换器，所有工作单元共享
pub struct PoolSwitcher {
    state: Arc<RwLock<SwitcherState>>,
    config: SwitchConfig,
    switch_history: Arc<RwLock<VecDeque<SwitchEvent>>>,
    switch_stats: Arc<RwLock<SwitchStats>>,
}

struct SwitcherState {
    current: Option<PoolEndpoint>,
    metrics: HashMap<PoolEndpoint, PoolMetrics>,
    last_switch: Option<Instant>,
    started: Instant,
}

impl SwitcherState {
    /// 计算驻留时间的起点: 上次切换，否则为启动时刻
    fn dwell_anchor(&self) -> Instant {
        self.last_switch.unwrap_or(self.started)
    }
}

/// 单个矿池的测量值
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub endpoint: PoolEndpoint,
    /// 延迟 EMA (ms)，无样本时为 None
    pub avg_latency_ms: Option<f64>,
    pub samples: u64,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub accepted: u64,
    pub last_update: SystemTime,
}

impl PoolMetrics {
    pub fn new(endpoint: PoolEndpoint) -> Self {
        Self {
            endpoint,
            avg_latency_ms: None,
            samples: 0,
            consecutive_errors: 0,
            total_errors: 0,
            accepted: 0,
            last_update: SystemTime::now(),
        }
    }

    pub fn record_latency(&mut self, latency_ms: f64) {
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            None => latency_ms,
            Some(avg) => LATENCY_EMA_WEIGHT * latency_ms + (1.0 - LATENCY_EMA_WEIGHT) * avg,
        });
        self.samples += 1;
        self.last_update = SystemTime::now();
    }

    pub fn record_error(&mut self) {
        self.consecutive_errors += 1;
        self.total_errors += 1;
        self.last_update = SystemTime::now();
    }

    pub fn record_accepted(&mut self) {
        self.consecutive_errors = 0;
        self.accepted += 1;
        self.last_update = SystemTime::now();
    }
}

/// 切换配置
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    pub enabled: bool,
    /// 延迟阈值 (ms)
    pub latency_threshold_ms: f64,
    /// 因延迟切换前需经过的时间
    pub latency_dwell: Duration,
    pub error_threshold: u32,
    /// 因错误切换前需经过的时间
    pub error_dwell: Duration,
    /// 两次切换之间的最短间隔
    pub min_dwell: Duration,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_threshold_ms: 800.0,
            latency_dwell: Duration::from_secs(30),
            error_threshold: 3,
            error_dwell: Duration::from_secs(10),
            min_dwell: Duration::from_secs(10),
        }
    }
}

impl From<&SwitchingSettings> for SwitchConfig {
    fn from(settings: &SwitchingSettings) -> Self {
        Self {
            enabled: settings.enabled,
            latency_threshold_ms: settings.latency_threshold_ms,
            latency_dwell: Duration::from_secs(settings.latency_dwell_secs),
            error_threshold: settings.error_threshold,
            error_dwell: Duration::from_secs(settings.error_dwell_secs),
            min_dwell: Duration::from_secs(settings.min_dwell_secs),
        }
    }
}

/// 切换原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchReason {
    HighLatency,
    ConsecutiveErrors,
    /// 连接多次失败
    Failover,
}

impl fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchReason::HighLatency => write!(f, "high latency"),
            SwitchReason::ConsecutiveErrors => write!(f, "consecutive errors"),
            SwitchReason::Failover => write!(f, "failover"),
        }
    }
}

/// 一次评估的结论
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchDecision {
    Stay,
    SwitchTo {
        from: PoolEndpoint,
        target: PoolEndpoint,
        reason: SwitchReason,
    },
    Rediscover {
        from: Option<PoolEndpoint>,
        reason: SwitchReason,
    },
}

/// 切换事件
#[derive(Debug, Clone)]
pub struct SwitchEvent {
    pub timestamp: SystemTime,
    pub from_pool: Option<PoolEndpoint>,
    /// None 表示重新发现
    pub to_pool: Option<PoolEndpoint>,
    pub reason: SwitchReason,
    /// 因驻留时间未到被拒绝时为 false
    pub success: bool,
}

/// 切换统计
#[derive(Debug, Clone, Default)]
pub struct SwitchStats {
    pub total_switches: u64,
    pub successful_switches: u64,
    pub failed_switches: u64,
    pub rediscoveries: u64,
    pub last_switch_time: Option<SystemTime>,
    pub switches_by_reason: HashMap<SwitchReason, u64>,
}

impl SwitchStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_switches == 0 {
            0.0
        } else {
            self.successful_switches as f64 / self.total_switches as f64 * 100.0
        }
    }
}

impl PoolSwitcher {
    pub fn new(config: SwitchConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(SwitcherState {
                current: None,
                metrics: HashMap::new(),
                last_switch: None,
                started: Instant::now(),
            })),
            config,
            switch_history: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_SWITCH_HISTORY))),
            switch_stats: Arc::new(RwLock::new(SwitchStats::default())),
        }
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    /// 当前矿池，None 表示需要发现
    pub async fn current(&self) -> Option<PoolEndpoint> {
        self.state.read().await.current.clone()
    }

    /// 设置当前矿池 (初次连接或重新发现之后)，不计为一次切换
    pub async fn set_current(&self, endpoint: PoolEndpoint) {
        let mut state = self.state.write().await;
        state
            .metrics
            .entry(endpoint.clone())
            .or_insert_with(|| PoolMetrics::new(endpoint.clone()));
        if state.current.as_ref() != Some(&endpoint) {
            debug!("Current pool set to {}", endpoint);
            state.current = Some(endpoint);
        }
    }

    pub async fn record_latency(&self, endpoint: &PoolEndpoint, rtt: Duration) {
        let mut state = self.state.write().await;
        state
            .metrics
            .entry(endpoint.clone())
            .or_insert_with(|| PoolMetrics::new(endpoint.clone()))
            .record_latency(rtt.as_secs_f64() * 1000.0);
    }

    pub async fn record_error(&self, endpoint: &PoolEndpoint) {
        let mut state = self.state.write().await;
        state
            .metrics
            .entry(endpoint.clone())
            .or_insert_with(|| PoolMetrics::new(endpoint.clone()))
            .record_error();
    }

    pub async fn record_accepted(&self, endpoint: &PoolEndpoint) {
        let mut state = self.state.write().await;
        state
            .metrics
            .entry(endpoint.clone())
            .or_insert_with(|| PoolMetrics::new(endpoint.clone()))
            .record_accepted();
    }

    pub async fn metrics(&self, endpoint: &PoolEndpoint) -> Option<PoolMetrics> {
        self.state.read().await.metrics.get(endpoint).cloned()
    }

    pub async fn evaluate(&self) -> SwitchDecision {
        self.evaluate_at(Instant::now()).await
    }

    /// 在给定时刻评估是否需要切换
    pub async fn evaluate_at(&self, now: Instant) -> SwitchDecision {
        if !self.config.enabled {
            return SwitchDecision::Stay;
        }
        let state = self.state.read().await;
        decide(&state, &self.config, now)
    }

    pub async fn apply(&self, decision: SwitchDecision) -> bool {
        self.apply_at(decision, Instant::now()).await
    }

    /// 执行切换，驻留时间未到或其他工作单元已经切换时返回 false
    pub async fn apply_at(&self, decision: SwitchDecision, now: Instant) -> bool {
        let (from, to, reason) = match decision {
            SwitchDecision::Stay => return false,
            SwitchDecision::SwitchTo { from, target, reason } => (Some(from), Some(target), reason),
            SwitchDecision::Rediscover { from, reason } => (from, None, reason),
        };

        let applied = {
            let mut state = self.state.write().await;
            if state.current != from {
                // 其他工作单元已经处理过
                return false;
            }
            if now.saturating_duration_since(state.dwell_anchor()) < self.config.min_dwell {
                false
            } else {
                state.current = to.clone();
                state.last_switch = Some(now);
                true
            }
        };

        match (&to, applied) {
            (Some(target), true) => info!(
                "Switching pool {} -> {} ({})",
                from.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                target,
                reason
            ),
            (None, true) => info!(
                "Leaving pool {} ({}), requesting a new one from discovery",
                from.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                reason
            ),
            (_, false) => warn!("Pool switch ({}) suppressed, minimum dwell not reached", reason),
        }

        self.record_switch_event(from, to, reason, applied).await;
        applied
    }

    /// 连接多次失败后放弃当前矿池，不受驻留时间限制
    pub async fn failover(&self, endpoint: &PoolEndpoint) {
        {
            let mut state = self.state.write().await;
            if state.current.as_ref() != Some(endpoint) {
                return;
            }
            state.current = None;
            state.last_switch = Some(Instant::now());
        }
        warn!("Pool {} unreachable, requesting a new one from discovery", endpoint);
        self.record_switch_event(Some(endpoint.clone()), None, SwitchReason::Failover, true)
            .await;
    }

    async fn record_switch_event(
        &self,
        from_pool: Option<PoolEndpoint>,
        to_pool: Option<PoolEndpoint>,
        reason: SwitchReason,
        success: bool,
    ) {
        let rediscovery = to_pool.is_none();
        {
            let mut history = self.switch_history.write().await;
            if history.len() == MAX_SWITCH_HISTORY {
                history.pop_front();
            }
            history.push_back(SwitchEvent {
                timestamp: SystemTime::now(),
                from_pool,
                to_pool,
                reason,
                success,
            });
        }

        let mut stats = self.switch_stats.write().await;
        stats.total_switches += 1;
        if success {
            stats.successful_switches += 1;
            stats.last_switch_time = Some(SystemTime::now());
            if rediscovery {
                stats.rediscoveries += 1;
            }
        } else {
            stats.failed_switches += 1;
        }
        *stats.switches_by_reason.entry(reason).or_insert(0) += 1;
    }

    pub async fn get_switch_stats(&self) -> SwitchStats {
        self.switch_stats.read().await.clone()
    }

    /// 最近的切换记录，最新的在前
    pub async fn get_switch_history(&self, limit: Option<usize>) -> Vec<SwitchEvent> {
        let history = self.switch_history.read().await;
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }
}

fn decide(state: &SwitcherState, config: &SwitchConfig, now: Instant) -> SwitchDecision {
    let Some(current) = state.current.as_ref() else {
        return SwitchDecision::Stay;
    };
    let since = now.saturating_duration_since(state.dwell_anchor());
    if since < config.min_dwell {
        return SwitchDecision::Stay;
    }

    let Some(metrics) = state.metrics.get(current) else {
        return SwitchDecision::Stay;
    };
    let current_latency = metrics.avg_latency_ms;

    let reason = if current_latency.is_some_and(|ms| ms > config.latency_threshold_ms) && since >= config.latency_dwell {
        SwitchReason::HighLatency
    } else if metrics.consecutive_errors >= config.error_threshold && since >= config.error_dwell {
        SwitchReason::ConsecutiveErrors
    } else {
        return SwitchDecision::Stay;
    };

    let target = state
        .metrics
        .values()
        .filter(|m| &m.endpoint != current && m.consecutive_errors < config.error_threshold)
        .filter_map(|m| m.avg_latency_ms.map(|ms| (m, ms)))
        .filter(|(_, ms)| current_latency.map_or(true, |cur| *ms < cur))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(m, _)| m.endpoint.clone());

    match target {
        Some(target) => SwitchDecision::SwitchTo {
            from: current.clone(),
            target,
            reason,
        },
        None => SwitchDecision::Rediscover {
            from: Some(current.clone()),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(port: u16) -> PoolEndpoint {
        PoolEndpoint::new("127.0.0.1", port)
    }

    #[test]
    fn test_latency_ema() {
        let mut metrics = PoolMetrics::new(pool(1));
        metrics.record_latency(100.0);
        assert_eq!(metrics.avg_latency_ms, Some(100.0));
        metrics.record_latency(200.0);
        let avg = metrics.avg_latency_ms.unwrap();
        assert!((avg - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_accepted_share_resets_errors() {
        let mut metrics = PoolMetrics::new(pool(1));
        metrics.record_error();
        metrics.record_error();
        metrics.record_accepted();
        assert_eq!(metrics.consecutive_errors, 0);
        assert_eq!(metrics.total_errors, 2);
    }

    #[tokio::test]
    async fn test_high_latency_waits_for_dwell() {
        let switcher = PoolSwitcher::new(SwitchConfig::default());
        let start = Instant::now();
        switcher.set_current(pool(1)).await;
        switcher.record_latency(&pool(1), Duration::from_millis(1200)).await;

        assert_eq!(
            switcher.evaluate_at(start + Duration::from_secs(20)).await,
            SwitchDecision::Stay
        );
        assert_eq!(
            switcher.evaluate_at(start + Duration::from_secs(31)).await,
            SwitchDecision::Rediscover {
                from: Some(pool(1)),
                reason: SwitchReason::HighLatency
            }
        );
    }

    #[tokio::test]
    async fn test_switches_to_lower_latency_pool() {
        let switcher = PoolSwitcher::new(SwitchConfig::default());
        let start = Instant::now();
        switcher.record_latency(&pool(2), Duration::from_millis(150)).await;
        switcher.record_latency(&pool(3), Duration::from_millis(2000)).await;
        switcher.set_current(pool(1)).await;
        switcher.record_latency(&pool(1), Duration::from_millis(900)).await;

        let decision = switcher.evaluate_at(start + Duration::from_secs(31)).await;
        assert_eq!(
            decision,
            SwitchDecision::SwitchTo {
                from: pool(1),
                target: pool(2),
                reason: SwitchReason::HighLatency
            }
        );
        assert!(switcher.apply_at(decision, start + Duration::from_secs(31)).await);
        assert_eq!(switcher.current().await, Some(pool(2)));
    }

    #[tokio::test]
    async fn test_consecutive_errors_trigger_after_error_dwell() {
        let switcher = PoolSwitcher::new(SwitchConfig::default());
        let start = Instant::now();
        switcher.set_current(pool(1)).await;
        for _ in 0..3 {
            switcher.record_error(&pool(1)).await;
        }

        assert_eq!(
            switcher.evaluate_at(start + Duration::from_secs(5)).await,
            SwitchDecision::Stay
        );
        assert!(matches!(
            switcher.evaluate_at(start + Duration::from_secs(11)).await,
            SwitchDecision::Rediscover {
                reason: SwitchReason::ConsecutiveErrors,
                ..
            }
        ));

        switcher.record_accepted(&pool(1)).await;
        assert_eq!(
            switcher.evaluate_at(start + Duration::from_secs(11)).await,
            SwitchDecision::Stay
        );
    }

    #[tokio::test]
    async fn test_no_double_switch_within_dwell() {
        let switcher = PoolSwitcher::new(SwitchConfig::default());
        let start = Instant::now();
        switcher.record_latency(&pool(2), Duration::from_millis(100)).await;
        switcher.set_current(pool(1)).await;
        for _ in 0..3 {
            switcher.record_error(&pool(1)).await;
        }

        let first = start + Duration::from_secs(12);
        let decision = switcher.evaluate_at(first).await;
        assert!(switcher.apply_at(decision, first).await);
        assert_eq!(switcher.current().await, Some(pool(2)));

        for _ in 0..3 {
            switcher.record_error(&pool(2)).await;
        }
        let soon = first + Duration::from_secs(5);
        assert_eq!(switcher.evaluate_at(soon).await, SwitchDecision::Stay);

        let forced = SwitchDecision::Rediscover {
            from: Some(pool(2)),
            reason: SwitchReason::ConsecutiveErrors,
        };
        assert!(!switcher.apply_at(forced.clone(), soon).await);
        assert_eq!(switcher.current().await, Some(pool(2)));

        assert!(switcher.apply_at(forced, first + Duration::from_secs(11)).await);
        assert_eq!(switcher.current().await, None);

        let stats = switcher.get_switch_stats().await;
        assert_eq!(stats.total_switches, 3);
        assert_eq!(stats.successful_switches, 2);
        assert_eq!(stats.failed_switches, 1);
        assert_eq!(stats.rediscoveries, 1);

        let history = switcher.get_switch_history(Some(1)).await;
        assert_eq!(history.len(), 1);
        assert!(history[0].to_pool.is_none());
    }

    #[tokio::test]
    async fn test_stale_decision_is_ignored() {
        let switcher = PoolSwitcher::new(SwitchConfig::default());
        let later = Instant::now() + Duration::from_secs(60);
        switcher.set_current(pool(2)).await;

        let stale = SwitchDecision::Rediscover {
            from: Some(pool(1)),
            reason: SwitchReason::HighLatency,
        };
        assert!(!switcher.apply_at(stale, later).await);
        assert_eq!(switcher.get_switch_stats().await.total_switches, 0);
    }

    #[tokio::test]
    async fn test_failover_clears_current_pool() {
        let switcher = PoolSwitcher::new(SwitchConfig::default());
        switcher.set_current(pool(1)).await;

        switcher.failover(&pool(9)).await;
        assert_eq!(switcher.current().await, Some(pool(1)));

        switcher.failover(&pool(1)).await;
        assert_eq!(switcher.current().await, None);
        let stats = switcher.get_switch_stats().await;
        assert_eq!(stats.switches_by_reason.get(&SwitchReason::Failover), Some(&1));
    }

    #[tokio::test]
    async fn test_disabled_switcher_stays() {
        let switcher = PoolSwitcher::new(SwitchConfig {
            enabled: false,
            ..Default::default()
        });
        switcher.set_current(pool(1)).await;
        switcher.record_latency(&pool(1), Duration::from_secs(5)).await;
        assert_eq!(
            switcher.evaluate_at(Instant::now() + Duration::from_secs(120)).await,
            SwitchDecision::Stay
        );
    }

    #[tokio::test]
    async fn test_switch_history_is_bounded() {
        let switcher = PoolSwitcher::new(SwitchConfig::default());
        let total = MAX_SWITCH_HISTORY as u16 + 20;
        for port in 1..=total {
            switcher.set_current(pool(port)).await;
            switcher.failover(&pool(port)).await;
        }

        let history = switcher.get_switch_history(None).await;
        assert_eq!(history.len(), MAX_SWITCH_HISTORY);
        assert_eq!(history[0].from_pool, Some(pool(total)));
        assert_eq!(history.last().and_then(|e| e.from_pool.clone()), Some(pool(21)));
        assert_eq!(switcher.get_switch_stats().await.total_switches, total as u64);
    }
}
