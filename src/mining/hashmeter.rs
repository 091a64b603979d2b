//! 全局挖矿状态与周期报告
//!
//! 每个工作单元只写自己的槽位，读取方得到的是最终一致的快照。

use crate::pool::FeedbackStatus;
use crate::utils::{format_hashrate, format_uptime};
use ducominer_core::Share;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

/// 状态行使用的日志目标
pub const STATUS_TARGET: &str = "ducominer::status";

/// 工作单元每 3 个份额或每秒刷新一次槽位
pub const FLUSH_EVERY_SHARES: u64 = 3;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// 快照缓存每 5 个份额或每秒刷新一次
pub const CACHE_EVERY_SHARES: u64 = 5;
pub const CACHE_INTERVAL: Duration = Duration::from_secs(1);

/// 每累计接受这么多份额输出一次里程碑
pub const MILESTONE_EVERY: u64 = 100;

#[derive(Debug, Default)]
struct WorkerSlot {
    accepted: AtomicU64,
    rejected: AtomicU64,
    blocks: AtomicU64,
    anomalies: AtomicU64,
    hashes: AtomicU64,
    hashrate_bits: AtomicU64,
    intensity: AtomicU8,
}

/// 所有工作单元共享的状态
#[derive(Debug)]
pub struct MinerStatus {
    slots: Box<[WorkerSlot]>,
    started: Instant,
    last_milestone: AtomicU64,
}

/// 某一时刻的聚合值
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub blocks: u64,
    pub anomalies: u64,
    pub hashes: u64,
    /// 各工作单元最近算力之和 (H/s)
    pub hashrate: f64,
    pub intensity: u8,
    pub uptime: Duration,
}

impl StatusSnapshot {
    pub fn total_shares(&self) -> u64 {
        self.accepted + self.rejected
    }

    pub fn accepted_pct(&self) -> f64 {
        let total = self.total_shares();
        if total == 0 {
            0.0
        } else {
            self.accepted as f64 / total as f64 * 100.0
        }
    }
}

impl MinerStatus {
    pub fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers.max(1)).map(|_| WorkerSlot::default()).collect(),
            started: Instant::now(),
            last_milestone: AtomicU64::new(0),
        }
    }

    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn publish(&self, counters: &LocalCounters) {
        let Some(slot) = self.slots.get(counters.worker) else {
            return;
        };
        slot.accepted.store(counters.accepted, Ordering::Relaxed);
        slot.rejected.store(counters.rejected, Ordering::Relaxed);
        slot.blocks.store(counters.blocks, Ordering::Relaxed);
        slot.anomalies.store(counters.anomalies, Ordering::Relaxed);
        slot.hashes.store(counters.hashes, Ordering::Relaxed);
        slot.hashrate_bits.store(counters.hashrate.to_bits(), Ordering::Relaxed);
        slot.intensity.store(counters.intensity, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot {
            uptime: self.uptime(),
            ..Default::default()
        };
        let mut intensity_sum = 0u64;

        for slot in self.slots.iter() {
            snapshot.accepted += slot.accepted.load(Ordering::Relaxed);
            snapshot.rejected += slot.rejected.load(Ordering::Relaxed);
            snapshot.blocks += slot.blocks.load(Ordering::Relaxed);
            snapshot.anomalies += slot.anomalies.load(Ordering::Relaxed);
            snapshot.hashes += slot.hashes.load(Ordering::Relaxed);
            snapshot.hashrate += f64::from_bits(slot.hashrate_bits.load(Ordering::Relaxed));
            intensity_sum += u64::from(slot.intensity.load(Ordering::Relaxed));
        }
        snapshot.intensity = (intensity_sum / self.slots.len() as u64) as u8;
        snapshot
    }

    /// 跨过新的里程碑时只有一个调用者得到 Some
    pub fn claim_milestone(&self, accepted: u64) -> Option<u64> {
        let reached = accepted / MILESTONE_EVERY * MILESTONE_EVERY;
        if reached == 0 {
            return None;
        }
        let previous = self.last_milestone.load(Ordering::Relaxed);
        if reached <= previous {
            return None;
        }
        self.last_milestone
            .compare_exchange(previous, reached, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| reached)
    }
}

/// 工作单元本地计数，按批刷新到共享槽位
#[derive(Debug)]
pub struct LocalCounters {
    worker: usize,
    pub accepted: u64,
    pub rejected: u64,
    pub blocks: u64,
    pub anomalies: u64,
    pub hashes: u64,
    pub hashrate: f64,
    pub intensity: u8,
    unflushed: u64,
    last_flush: Instant,
}

impl LocalCounters {
    pub fn new(worker: usize, intensity: u8) -> Self {
        Self {
            worker,
            accepted: 0,
            rejected: 0,
            blocks: 0,
            anomalies: 0,
            hashes: 0,
            hashrate: 0.0,
            intensity,
            unflushed: 0,
            last_flush: Instant::now(),
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn record_share(&mut self, feedback: &FeedbackStatus, share: &Share) {
        match feedback {
            FeedbackStatus::Good => self.accepted += 1,
            FeedbackStatus::Block => {
                self.accepted += 1;
                self.blocks += 1;
            }
            FeedbackStatus::Bad(_) | FeedbackStatus::Other(_) => self.rejected += 1,
        }
        self.hashes += (share.hashrate * share.compute_time).round().max(1.0) as u64;
        self.hashrate = share.hashrate;
        self.unflushed += 1;
    }

    pub fn record_anomaly(&mut self) {
        self.anomalies += 1;
        self.unflushed += 1;
    }

    pub fn should_flush(&self, now: Instant) -> bool {
        self.unflushed >= FLUSH_EVERY_SHARES
            || (self.unflushed > 0 && now.saturating_duration_since(self.last_flush) >= FLUSH_INTERVAL)
    }

    pub fn flush(&mut self, status: &MinerStatus) {
        status.publish(self);
        self.unflushed = 0;
        self.last_flush = Instant::now();
    }

    pub fn maybe_flush(&mut self, status: &MinerStatus) -> bool {
        if self.should_flush(Instant::now()) {
            self.flush(status);
            true
        } else {
            false
        }
    }
}

/// 快照缓存，避免每个份额都遍历所有槽位
pub struct StatusCache {
    status: Arc<MinerStatus>,
    snapshot: StatusSnapshot,
    shares_since_refresh: u64,
    refreshed_at: Instant,
}

impl StatusCache {
    pub fn new(status: Arc<MinerStatus>) -> Self {
        let snapshot = status.snapshot();
        Self {
            status,
            snapshot,
            shares_since_refresh: 0,
            refreshed_at: Instant::now(),
        }
    }

    pub fn note_share(&mut self) {
        self.shares_since_refresh += 1;
    }

    pub fn get(&mut self) -> &StatusSnapshot {
        self.get_at(Instant::now())
    }

    pub fn get_at(&mut self, now: Instant) -> &StatusSnapshot {
        if self.shares_since_refresh >= CACHE_EVERY_SHARES
            || now.saturating_duration_since(self.refreshed_at) >= CACHE_INTERVAL
        {
            self.snapshot = self.status.snapshot();
            self.shares_since_refresh = 0;
            self.refreshed_at = now;
        }
        &self.snapshot
    }
}

/// 输出单个份额的状态行
pub fn log_share(
    worker: usize,
    feedback: &FeedbackStatus,
    share: &Share,
    difficulty: u64,
    ping: Duration,
    totals: &StatusSnapshot,
) {
    let reason = feedback
        .reason()
        .map(|r| format!(" reason={:?}", r))
        .unwrap_or_default();

    info!(
        target: STATUS_TARGET,
        "share worker={} status={} accepted={} total={} pct={:.2} time={:.3} hashrate={:.2} total_hashrate={:.2} diff={} ping={}{}",
        worker,
        feedback.label(),
        totals.accepted,
        totals.total_shares(),
        totals.accepted_pct(),
        share.compute_time,
        share.hashrate,
        totals.hashrate,
        difficulty,
        ping.as_millis(),
        reason
    );
}

/// 一个报告周期的统计
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub period: Duration,
    pub shares: u64,
    pub rate: f64,
    pub blocks: u64,
    pub hashrate: f64,
    pub hashes: u64,
    pub uptime: Duration,
    pub intensity: u8,
}

impl PeriodReport {
    pub fn between(previous: &StatusSnapshot, current: &StatusSnapshot, period: Duration) -> Self {
        let shares = current.total_shares().saturating_sub(previous.total_shares());
        let secs = period.as_secs_f64();
        Self {
            period,
            shares,
            rate: if secs > 0.0 { shares as f64 / secs } else { 0.0 },
            blocks: current.blocks,
            hashrate: current.hashrate,
            hashes: current.hashes.saturating_sub(previous.hashes),
            uptime: current.uptime,
            intensity: current.intensity,
        }
    }

    pub fn log(&self) {
        info!(
            target: STATUS_TARGET,
            "report period={} shares={} rate={:.3} blocks={} hashrate={:.2} hashes={} uptime={} intensity={}",
            self.period.as_secs(),
            self.shares,
            self.rate,
            self.blocks,
            self.hashrate,
            self.hashes,
            format_uptime(self.uptime),
            self.intensity
        );
    }
}

/// 周期报告任务
pub struct Hashmeter {
    status: Arc<MinerStatus>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Hashmeter {
    pub fn new(status: Arc<MinerStatus>, interval: Duration) -> Self {
        Self {
            status,
            interval,
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let status = self.status.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 第一次 tick 立即返回
            ticker.tick().await;
            let mut previous = status.snapshot();
            let mut previous_at = Instant::now();

            loop {
                ticker.tick().await;
                let current = status.snapshot();
                PeriodReport::between(&previous, &current, previous_at.elapsed()).log();
                previous = current;
                previous_at = Instant::now();
            }
        });

        *self.handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    /// 输出里程碑，多个工作单元同时跨过时只输出一次
    pub fn check_milestone(status: &MinerStatus, snapshot: &StatusSnapshot) {
        if let Some(reached) = status.claim_milestone(snapshot.accepted) {
            info!(
                "Milestone: {} accepted shares, running at {} for {}",
                reached,
                format_hashrate(snapshot.hashrate),
                format_uptime(snapshot.uptime)
            );
        }
    }
}
