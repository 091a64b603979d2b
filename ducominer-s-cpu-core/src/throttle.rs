//! 强度节流

use std::time::Duration;

/// 每检查多少个 nonce 暂停一次
pub const THROTTLE_INTERVAL: u64 = 1000;

/// 强度 → 效率（毫秒/千次）映射表
pub fn efficiency_for_intensity(intensity: u8) -> f64 {
    match intensity {
        90.. => 0.005,
        70..=89 => 0.1,
        50..=69 => 0.8,
        30..=49 => 1.8,
        1..=29 => 3.0,
        0 => 0.0,
    }
}

/// 搜索循环节流器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throttle {
    efficiency: f64,
}

impl Throttle {
    /// 不暂停
    pub fn unthrottled() -> Self {
        Self { efficiency: 0.0 }
    }

    pub fn from_intensity(intensity: u8) -> Self {
        Self {
            efficiency: efficiency_for_intensity(intensity),
        }
    }

    pub fn efficiency(&self) -> f64 {
        self.efficiency
    }

    /// 每次暂停的时长，效率为 0 时不暂停
    pub fn pause(&self) -> Option<Duration> {
        (self.efficiency > 0.0).then(|| Duration::from_secs_f64(self.efficiency / 1000.0))
    }

    /// 在第 `checked` 个 nonce 处按需暂停
    #[inline]
    pub fn tick(&self, checked: u64) {
        if checked % THROTTLE_INTERVAL == 0 && checked != 0 {
            if let Some(pause) = self.pause() {
                std::thread::sleep(pause);
            }
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::unthrottled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_efficiency_table() {
        assert_eq!(efficiency_for_intensity(100), 0.005);
        assert_eq!(efficiency_for_intensity(90), 0.005);
        assert_eq!(efficiency_for_intensity(89), 0.1);
        assert_eq!(efficiency_for_intensity(70), 0.1);
        assert_eq!(efficiency_for_intensity(50), 0.8);
        assert_eq!(efficiency_for_intensity(30), 1.8);
        assert_eq!(efficiency_for_intensity(1), 3.0);
        assert_eq!(efficiency_for_intensity(0), 0.0);
    }

    #[test]
    fn test_pause_duration() {
        assert_eq!(Throttle::unthrottled().pause(), None);
        let throttle = Throttle::from_intensity(30);
        assert_eq!(throttle.pause(), Some(Duration::from_micros(1800)));
    }
}
