//! Operational log sink.
//!
//! Free-form diagnostic lines (moderation rejections, answered queries) go
//! to a sink injected per invocation. Sinks swallow their own failures: a
//! broken sink must never abort a chat.

use std::sync::Mutex;

pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

/// Forwards every line to `tracing` under the `citeflow::oplog` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, line: &str) {
        tracing::info!(target: "citeflow::oplog", "{}", line);
    }
}

/// Keeps lines in memory. Useful for tests and for callers that ship the
/// log elsewhere after the invocation.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemoryLogSink::new();
        sink.log("first");
        sink.log("second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
        assert!(sink.contains("sec"));
    }

    #[test]
    fn tracing_sink_without_subscriber_is_silent() {
        TracingLogSink.log("nobody is listening");
    }
}
