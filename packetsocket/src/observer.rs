/// Receives a connection's reportable events.
///
/// Every event is also logged. Methods are called from the receive loop and
/// must return quickly.
pub trait ConnectionObserver: Send + Sync + 'static {
    /// A frame could not be dispatched. Fatal errors are followed by `on_close`.
    fn on_frame_error(&self, _error: &crate::Error) {}

    /// A frame was dropped by the connection's group filter.
    fn on_dropped_frame(&self, _group: &str, _alias: &str) {}

    /// The connection closed. Called exactly once.
    fn on_close(&self) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DoNothingObserver;

impl ConnectionObserver for DoNothingObserver {}
