use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::SharedStats;
use crate::core::consumer::FrameConsumer;
use crate::sensor::frame::PixelFormat;
use crate::sensor::{ColorFrame, StreamSet};

/// Describes a raw color record; written next to it as `<record>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorRecordInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub bytes_per_frame: usize,
    pub frames: u64,
}

/// Appends raw YUY2 frames back to back. Frame boundaries follow from the
/// fixed frame size of the negotiated resolution.
pub struct ColorWriter<W: Write> {
    out: BufWriter<W>,
    width: u32,
    height: u32,
    frame_len: usize,
    sidecar: Option<PathBuf>,
    stats: SharedStats,
}

impl ColorWriter<File> {
    pub fn create(path: &Path, width: u32, height: u32) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = Self::new(file, width, height);
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(".json");
        writer.sidecar = Some(PathBuf::from(sidecar));
        Ok(writer)
    }
}

impl<W: Write> ColorWriter<W> {
    pub fn new(out: W, width: u32, height: u32) -> Self {
        let frame_len = ColorFrame::expected_len(width, height, PixelFormat::Yuy2);
        Self {
            // Room for one whole frame so each frame is a single write.
            out: BufWriter::with_capacity(frame_len.max(8 * 1024), out),
            width,
            height,
            frame_len,
            sidecar: None,
            stats: SharedStats::default(),
        }
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub fn info(&self) -> ColorRecordInfo {
        ColorRecordInfo {
            width: self.width,
            height: self.height,
            pixel_format: PixelFormat::Yuy2.name().to_string(),
            bytes_per_frame: self.frame_len,
            frames: self.stats.snapshot().frames_written,
        }
    }
}

impl<W: Write + Send> FrameConsumer for ColorWriter<W> {
    fn name(&self) -> &str {
        "color-writer"
    }

    fn streams(&self) -> StreamSet {
        StreamSet::COLOR
    }

    fn on_color_frame(&mut self, frame: &ColorFrame) -> Result<()> {
        if frame.format != PixelFormat::Yuy2 || frame.width != self.width || frame.height != self.height {
            bail!(
                "color frame {}x{} {} does not match negotiated {}x{} {}",
                frame.width,
                frame.height,
                frame.format.name(),
                self.width,
                self.height,
                PixelFormat::Yuy2.name()
            );
        }
        if frame.data.len() != self.frame_len {
            bail!("color frame has {} bytes, expected {}", frame.data.len(), self.frame_len);
        }
        self.out.write_all(&frame.data).context("failed to write color record")?;
        let len = frame.data.len() as u64;
        self.stats.update(|s| {
            s.frames_written += 1;
            s.bytes_written += len;
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().context("failed to flush color record")?;
        if let Some(path) = &self.sidecar {
            let json = serde_json::to_string_pretty(&self.info())?;
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }
}
