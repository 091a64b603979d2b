//! 实用工具模块

pub mod hashrate_formatter;

pub use hashrate_formatter::{format_hashrate, format_uptime};
