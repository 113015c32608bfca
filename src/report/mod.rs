//! Decision history and post-run analysis.

mod analyzer;
mod log;

pub use analyzer::{analyze, EntityReport, MinuteReport, Report};
pub use log::{LogEntry, RequestLog};
