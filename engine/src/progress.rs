//! Human-readable progress reporting, independent of the event stream.

/// Receives progress lines and counters from a running operation.
pub trait ProgressSink: Send + Sync {
    /// A human-readable progress line.
    fn log(&self, line: &str);

    /// `current` of `total` items are done.
    fn advance(&self, current: usize, total: usize) {
        let _ = (current, total);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line)
    }
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn log(&self, _line: &str) {}
}
