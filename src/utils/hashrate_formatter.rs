//! 算力与运行时间格式化

use std::time::Duration;

const UNITS: &[&str] = &["H/s", "kH/s", "MH/s", "GH/s", "TH/s"];

/// 格式化算力，自动选择单位使数值落在 1-999 之间
///
/// ```
/// use ducominer_rs::utils::format_hashrate;
///
/// assert_eq!(format_hashrate(1234.0), "1.23 kH/s");
/// assert_eq!(format_hashrate(2_500_000.0), "2.50 MH/s");
/// ```
pub fn format_hashrate(hashrate: f64) -> String {
    if !hashrate.is_finite() || hashrate <= 0.0 {
        return "0.00 H/s".to_string();
    }

    let mut value = hashrate;
    let mut unit = 0;
    while value >= 1000.0 && unit + 1 < UNITS.len() {
        value /= 1000.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}

/// 紧凑的运行时间，不含空格，便于状态行解析
///
/// ```
/// use ducominer_rs::utils::format_uptime;
/// use std::time::Duration;
///
/// assert_eq!(format_uptime(Duration::from_secs(3725)), "1h02m05s");
/// ```
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}d{:02}h{:02}m{:02}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h{:02}m{:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
