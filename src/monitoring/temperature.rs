use sysinfo::Components;
use tracing::debug;

/// 温度来源，用于强度调节
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureProbe: Send {
    /// 当前 CPU 温度 (°C)，无法读取时为 None
    fn cpu_temperature(&mut self) -> Option<f32>;
}

/// 通过 sysinfo 读取硬件传感器
pub struct SystemTemperature {
    components: Components,
}

/// 被视为 CPU 温度的传感器标签
const CPU_LABELS: &[&str] = &["cpu", "package", "core", "tctl", "tdie", "k10temp", "coretemp"];

impl SystemTemperature {
    pub fn new() -> Self {
        let components = Components::new_with_refreshed_list();
        debug!("Found {} temperature sensors", components.list().len());
        Self { components }
    }

    pub fn has_sensors(&self) -> bool {
        !self.components.list().is_empty()
    }
}

impl Default for SystemTemperature {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureProbe for SystemTemperature {
    fn cpu_temperature(&mut self) -> Option<f32> {
        self.components.refresh();

        let readings: Vec<(String, f32)> = self
            .components
            .list()
            .iter()
            .map(|c| (c.label().to_ascii_lowercase(), c.temperature()))
            .filter(|(_, t)| t.is_finite() && *t > 0.0)
            .collect();

        hottest_cpu_reading(&readings)
    }
}

/// 优先取 CPU 相关传感器的最高值，没有时取全部传感器的最高值
fn hottest_cpu_reading(readings: &[(String, f32)]) -> Option<f32> {
    let is_cpu = |label: &str| CPU_LABELS.iter().any(|l| label.contains(l));

    let cpu_max = readings
        .iter()
        .filter(|(label, _)| is_cpu(label))
        .map(|(_, t)| *t)
        .reduce(f32::max);

    cpu_max.or_else(|| readings.iter().map(|(_, t)| *t).reduce(f32::max))
}
