pub mod body_record;
pub mod body_writer;
pub mod color_writer;

pub use body_writer::BodyWriter;
pub use color_writer::ColorWriter;

use std::sync::{Arc, Mutex};

/// Counters a writer publishes for the status line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WriterStats {
    pub frames_written: u64,
    pub lines_written: u64,
    pub bytes_written: u64,
    /// Tracked bodies in the most recent frame.
    pub tracked_bodies: usize,
}

/// Writer stats behind a lock; updated on the frame thread, read by the status thread.
#[derive(Debug, Clone, Default)]
pub struct SharedStats(Arc<Mutex<WriterStats>>);

impl SharedStats {
    pub fn snapshot(&self) -> WriterStats {
        match self.0.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut WriterStats)) {
        match self.0.lock() {
            Ok(mut stats) => f(&mut stats),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}
