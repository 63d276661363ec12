//! Trace logging for connection diagnostics.
//!
//! The connection reports its activity through a [`LogWriter`] supplied at
//! construction time. Entries are plain formatted lines so they can be routed
//! to any sink; filtering happens before formatting via [`TraceLevel`].

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};

/// The category a log entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    StateChange,
    Message,
    Error,
    Info,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogCategory::StateChange => f.pad("state change"),
            LogCategory::Message => f.pad("message"),
            LogCategory::Error => f.pad("error"),
            LogCategory::Info => f.pad("info"),
        }
    }
}

/// Which categories of entries the connection emits.
///
/// `Info` entries (lifecycle notes such as "stopping connection") are only
/// emitted at [`TraceLevel::All`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceLevel {
    #[default]
    None,
    StateChanges,
    Messages,
    Errors,
    All,
}

impl TraceLevel {
    /// Whether entries of `category` pass this level.
    pub fn includes(self, category: LogCategory) -> bool {
        match self {
            TraceLevel::None => false,
            TraceLevel::All => true,
            TraceLevel::StateChanges => category == LogCategory::StateChange,
            TraceLevel::Messages => category == LogCategory::Message,
            TraceLevel::Errors => category == LogCategory::Error,
        }
    }
}

/// Sink for formatted log entries.
///
/// Implementations must be thread-safe; entries may arrive from the receive
/// loop, from start/stop drivers and from user threads concurrently.
pub trait LogWriter: Send + Sync {
    /// Write one formatted entry. Entries are newline-terminated.
    fn write(&self, entry: &str);
}

/// Discards every entry.
#[derive(Debug, Default)]
pub struct NullLogWriter;

impl LogWriter for NullLogWriter {
    fn write(&self, _entry: &str) {}
}

/// Writes entries to standard error.
#[derive(Debug, Default)]
pub struct StderrLogWriter;

impl LogWriter for StderrLogWriter {
    fn write(&self, entry: &str) {
        eprint!("{entry}");
    }
}

/// Shared, filtered front-end over a [`LogWriter`].
///
/// Entries read `<timestamp> [<category>] <message>\n` with the category
/// padded to twelve columns, e.g.
/// `2024-01-01T00:00:00.000Z [state change] disconnected -> connecting`.
#[derive(Clone)]
pub(crate) struct Logger {
    writer: Arc<dyn LogWriter>,
    level: TraceLevel,
}

impl Logger {
    pub(crate) fn new(writer: Arc<dyn LogWriter>, level: TraceLevel) -> Self {
        Self { writer, level }
    }

    pub(crate) fn log(&self, category: LogCategory, message: impl fmt::Display) {
        if !self.level.includes(category) {
            return;
        }
        let entry = format!(
            "{} [{:<12}] {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            category,
            message
        );
        self.writer.write(&entry);
    }
}
