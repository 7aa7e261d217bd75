//! Progress reporting seam between the pipeline and its caller.

/// Receives user-facing progress from the pipeline.
///
/// The CLI implements this on its `RuntimeConfig`; library callers that do not
/// want terminal output pass [`SilentProgress`].
pub trait ProgressSink: Send + Sync {
    /// A pipeline step is starting
    fn progress(&self, message: &str);

    /// A line of build tool output
    fn indent(&self, line: &str);

    /// Something went wrong but the run continues
    fn warn(&self, message: &str);

    /// A step completed
    fn success(&self, message: &str);
}

/// Discards all progress output.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn progress(&self, _message: &str) {}

    fn indent(&self, _line: &str) {}

    fn warn(&self, _message: &str) {}

    fn success(&self, _message: &str) {}
}
