use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Monotonic clock a sensor stream stamps its frames with.
#[derive(Debug, Clone, Copy)]
pub struct StreamClock {
    start: Instant,
}

impl StreamClock {
    /// Create a stream clock starting at time zero
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Time since the stream started
    pub fn elapsed(&self) -> Duration {
        Instant::now().duration_since(self.start)
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative timestamp of the first frame of a session. Set once; every later
/// timestamp is reported relative to it.
#[derive(Debug, Default)]
pub struct TimeAnchor {
    anchor: OnceLock<Duration>,
}

impl TimeAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the anchor was already set.
    pub fn set(&self, first_frame: Duration) -> bool {
        self.anchor.set(first_frame).is_ok()
    }

    pub fn get(&self) -> Option<Duration> {
        self.anchor.get().copied()
    }

    /// `relative_time` minus the anchor. Before the anchor is set the frame
    /// is treated as the anchor itself.
    pub fn relative(&self, relative_time: Duration) -> Duration {
        let anchor = self.get().unwrap_or(relative_time);
        relative_time.saturating_sub(anchor)
    }
}
