use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::body_record::format_line;
use super::{SharedStats, WriterStats};
use crate::core::consumer::FrameConsumer;
use crate::sensor::frame::JointType;
use crate::sensor::{BodyFrame, StreamSet};
use crate::shared::constants::BODY_RECORD_HEADER;
use crate::sync::TimeAnchor;

/// Writes the first tracked body of every frame as text, one line per joint.
pub struct BodyWriter<W: Write> {
    out: BufWriter<W>,
    anchor: Arc<TimeAnchor>,
    stats: SharedStats,
}

impl BodyWriter<File> {
    pub fn create(path: &Path, anchor: Arc<TimeAnchor>) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Self::new(file, anchor)
    }
}

impl<W: Write> BodyWriter<W> {
    pub fn new(out: W, anchor: Arc<TimeAnchor>) -> Result<Self> {
        let mut out = BufWriter::new(out);
        writeln!(out, "{}", BODY_RECORD_HEADER).context("failed to write body record header")?;
        Ok(Self {
            out,
            anchor,
            stats: SharedStats::default(),
        })
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }
}

fn millis(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

impl<W: Write + Send> FrameConsumer for BodyWriter<W> {
    fn name(&self) -> &str {
        "body-writer"
    }

    fn streams(&self) -> StreamSet {
        StreamSet::BODY
    }

    fn on_body_frame(&mut self, frame: &BodyFrame) -> Result<()> {
        let tracked = frame.tracked_count();
        let Some(body) = frame.first_tracked() else {
            self.stats.update(|s| s.tracked_bodies = 0);
            return Ok(());
        };

        let timestamp_ms = millis(self.anchor.relative(frame.relative_time));
        let mut bytes = 0u64;
        for joint_type in JointType::ALL {
            let line = format_line(timestamp_ms, body.joint(joint_type));
            writeln!(self.out, "{}", line).context("failed to write body record")?;
            bytes += line.len() as u64 + 1;
        }

        let lines = JointType::ALL.len() as u64;
        self.stats.update(|s: &mut WriterStats| {
            s.frames_written += 1;
            s.lines_written += lines;
            s.bytes_written += bytes;
            s.tracked_bodies = tracked;
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().context("failed to flush body record")
    }
}
