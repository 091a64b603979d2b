pub mod temperature;

pub use temperature::{SystemTemperature, TemperatureProbe};
