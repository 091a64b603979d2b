//! 控制台日志格式: `[HH:MM:SS] LVL 消息`

use chrono::Local;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::mining::STATUS_TARGET;

pub struct MinerFormatter {
    colored: bool,
}

impl MinerFormatter {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }
}

/// 级别缩写，INFO 留空
fn level_label(level: &Level) -> (&'static str, &'static str) {
    match *level {
        Level::ERROR => ("ERR", "\x1b[31m"),
        Level::WARN => ("WRN", "\x1b[33m"),
        Level::INFO => ("   ", "\x1b[32m"),
        Level::DEBUG => ("DBG", "\x1b[36m"),
        Level::TRACE => ("TRC", "\x1b[37m"),
    }
}

impl<S, N> FormatEvent<S, N> for MinerFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();
        let timestamp = Local::now().format("%H:%M:%S");
        let (label, color) = level_label(metadata.level());

        if self.colored {
            // 状态行用青色时间戳区分
            let stamp_color = if metadata.target() == STATUS_TARGET { "\x1b[96m" } else { "\x1b[90m" };
            write!(writer, "{}[{}]\x1b[0m {}{}\x1b[0m ", stamp_color, timestamp, color, label)?;
        } else {
            write!(writer, "[{}] {} ", timestamp, label)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
