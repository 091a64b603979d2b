//! 强度自适应调节
//!
//! 每个窗口 (默认 45 秒) 根据拒绝率、最近的平均延迟和温度调整一次强度。

use crate::config::TuningSettings;
use crate::monitoring::TemperatureProbe;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 最近 N 次延迟样本
#[derive(Debug, Clone)]
pub struct PingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl PingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, ping_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ping_ms);
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// 一个窗口的观测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSample {
    pub accepted: u64,
    pub rejected: u64,
    pub avg_ping_ms: Option<f64>,
    pub temperature: Option<f32>,
}

impl WindowSample {
    pub fn reject_ratio(&self) -> f64 {
        let total = self.accepted + self.rejected;
        if total == 0 {
            0.0
        } else {
            self.rejected as f64 / total as f64
        }
    }
}

/// 调整结论
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntensityAdjustment {
    Hold,
    Decrease { from: u8, to: u8 },
    Increase { from: u8, to: u8 },
}

pub struct IntensityTuner {
    settings: TuningSettings,
    intensity: u8,
    window_start: Instant,
    accepted: u64,
    rejected: u64,
    pings: PingWindow,
    probe: Option<Box<dyn TemperatureProbe>>,
}

impl IntensityTuner {
    pub fn new(settings: TuningSettings, initial: u8, probe: Option<Box<dyn TemperatureProbe>>) -> Self {
        let pings = PingWindow::new(settings.ping_samples);
        Self {
            settings,
            intensity: initial,
            window_start: Instant::now(),
            accepted: 0,
            rejected: 0,
            pings,
            probe,
        }
    }

    pub fn intensity(&self) -> u8 {
        self.intensity
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.settings.window_secs)
    }

    pub fn record_share(&mut self, accepted: bool, ping: Duration) {
        if accepted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
        self.pings.push(ping.as_secs_f64() * 1000.0);
    }

    /// 纯决策: 给定窗口观测计算新强度
    pub fn evaluate(&self, sample: &WindowSample) -> IntensityAdjustment {
        let s = &self.settings;
        let current = self.intensity;

        let overloaded = sample.reject_ratio() > s.high_reject_ratio
            || sample.avg_ping_ms.is_some_and(|ms| ms > s.high_ping_ms)
            || sample.temperature.is_some_and(|t| t > s.max_temperature);

        if overloaded {
            let to = current.saturating_sub(s.step).max(s.min_intensity);
            return if to < current {
                IntensityAdjustment::Decrease { from: current, to }
            } else {
                IntensityAdjustment::Hold
            };
        }

        let healthy = sample.reject_ratio() < s.low_reject_ratio
            && sample.avg_ping_ms.map_or(true, |ms| ms < s.low_ping_ms)
            && sample.accepted > 0;

        if healthy {
            let to = current.saturating_add(s.step).min(s.max_intensity);
            if to > current {
                return IntensityAdjustment::Increase { from: current, to };
            }
        }

        IntensityAdjustment::Hold
    }

    pub fn maybe_adjust(&mut self) -> Option<u8> {
        self.maybe_adjust_at(Instant::now())
    }

    /// 窗口结束时调整一次并开始新窗口，强度变化时返回新值
    pub fn maybe_adjust_at(&mut self, now: Instant) -> Option<u8> {
        if !self.settings.enabled || now.saturating_duration_since(self.window_start) < self.window() {
            return None;
        }

        let temperature = self.probe.as_mut().and_then(|probe| probe.cpu_temperature());
        let sample = WindowSample {
            accepted: self.accepted,
            rejected: self.rejected,
            avg_ping_ms: self.pings.average(),
            temperature,
        };

        self.window_start = now;
        self.accepted = 0;
        self.rejected = 0;

        match self.evaluate(&sample) {
            IntensityAdjustment::Hold => {
                debug!(
                    "Intensity {} kept (reject {:.1}%, ping {:?})",
                    self.intensity,
                    sample.reject_ratio() * 100.0,
                    sample.avg_ping_ms
                );
                None
            }
            IntensityAdjustment::Decrease { from, to } => {
                info!(
                    "Lowering intensity {} -> {} (reject {:.1}%, ping {:.0} ms, temp {:?})",
                    from,
                    to,
                    sample.reject_ratio() * 100.0,
                    sample.avg_ping_ms.unwrap_or_default(),
                    sample.temperature
                );
                self.intensity = to;
                Some(to)
            }
            IntensityAdjustment::Increase { from, to } => {
                info!("Raising intensity {} -> {}", from, to);
                self.intensity = to;
                Some(to)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::temperature::MockTemperatureProbe;

    fn tuner(initial: u8) -> IntensityTuner {
        IntensityTuner::new(TuningSettings::default(), initial, None)
    }

    fn sample(accepted: u64, rejected: u64, ping: Option<f64>, temp: Option<f32>) -> WindowSample {
        WindowSample {
            accepted,
            rejected,
            avg_ping_ms: ping,
            temperature: temp,
        }
    }

    #[test]
    fn test_ping_window_keeps_last_samples() {
        let mut window = PingWindow::new(3);
        assert_eq!(window.average(), None);
        for ping in [100.0, 200.0, 300.0, 400.0] {
            window.push(ping);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), Some(300.0));
    }

    #[test]
    fn test_decrease_on_rejects_ping_or_heat() {
        let t = tuner(50);
        assert_eq!(
            t.evaluate(&sample(8, 2, Some(100.0), None)),
            IntensityAdjustment::Decrease { from: 50, to: 45 }
        );
        assert_eq!(
            t.evaluate(&sample(10, 0, Some(900.0), None)),
            IntensityAdjustment::Decrease { from: 50, to: 45 }
        );
        assert_eq!(
            t.evaluate(&sample(10, 0, Some(100.0), Some(81.0))),
            IntensityAdjustment::Decrease { from: 50, to: 45 }
        );
    }

    #[test]
    fn test_floor_and_ceiling() {
        assert_eq!(tuner(5).evaluate(&sample(0, 5, None, None)), IntensityAdjustment::Hold);
        assert_eq!(
            tuner(7).evaluate(&sample(0, 5, None, None)),
            IntensityAdjustment::Decrease { from: 7, to: 5 }
        );
        assert_eq!(tuner(100).evaluate(&sample(10, 0, Some(50.0), None)), IntensityAdjustment::Hold);
        assert_eq!(
            tuner(98).evaluate(&sample(10, 0, Some(50.0), None)),
            IntensityAdjustment::Increase { from: 98, to: 100 }
        );
    }

    #[test]
    fn test_increase_needs_accepted_shares() {
        let t = tuner(50);
        assert_eq!(t.evaluate(&sample(0, 0, None, None)), IntensityAdjustment::Hold);
        assert_eq!(
            t.evaluate(&sample(20, 0, Some(200.0), None)),
            IntensityAdjustment::Increase { from: 50, to: 55 }
        );
        // 中间区间保持不变
        assert_eq!(t.evaluate(&sample(20, 1, Some(600.0), None)), IntensityAdjustment::Hold);
    }

    #[test]
    fn test_adjusts_once_per_window_with_probe() {
        let mut probe = MockTemperatureProbe::new();
        probe.expect_cpu_temperature().times(1).return_const(Some(85.0f32));

        let mut t = IntensityTuner::new(TuningSettings::default(), 60, Some(Box::new(probe)));
        let start = Instant::now();
        t.record_share(true, Duration::from_millis(100));

        assert_eq!(t.maybe_adjust_at(start + Duration::from_secs(10)), None);
        assert_eq!(t.maybe_adjust_at(start + Duration::from_secs(46)), Some(55));
        assert_eq!(t.intensity(), 55);
        // 新窗口尚未结束
        assert_eq!(t.maybe_adjust_at(start + Duration::from_secs(50)), None);
    }
}
