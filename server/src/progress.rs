//! Progress sinks for the CLI and for background runs.

use badger_engine::ProgressSink;

/// Prints progress lines to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn log(&self, line: &str) {
        println!("{line}");
    }
}

/// Sends progress lines to the log, tagged with the run they belong to.
#[derive(Debug, Clone)]
pub struct LogProgress {
    pub correlation_id: String,
}

impl ProgressSink for LogProgress {
    fn log(&self, line: &str) {
        tracing::info!(correlation_id = %self.correlation_id, "{line}");
    }

    fn advance(&self, current: usize, total: usize) {
        tracing::debug!(correlation_id = %self.correlation_id, current, total, "progress");
    }
}
