use anyhow::Result;
use crossbeam_channel::{select, Sender};
use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::recorder::SharedStats;
use crate::sync::SharedRate;

/// Counters the status line reads. The reporter never writes to any of them.
#[derive(Clone, Default)]
pub struct StatusCounters {
    pub body_rate: Option<SharedRate>,
    pub color_rate: Option<SharedRate>,
    pub body_stats: Option<SharedStats>,
    pub color_stats: Option<SharedStats>,
    pub skipped: Option<Arc<AtomicU64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub body_fps: Option<f64>,
    pub color_fps: Option<f64>,
    pub tracked: Option<usize>,
    pub body_frames: Option<u64>,
    pub color_frames: Option<u64>,
    pub skipped: u64,
    pub elapsed: Duration,
}

impl StatusCounters {
    pub fn snapshot(&self, elapsed: Duration) -> StatusSnapshot {
        let body = self.body_stats.as_ref().map(|s| s.snapshot());
        StatusSnapshot {
            body_fps: self.body_rate.as_ref().map(|r| r.value()),
            color_fps: self.color_rate.as_ref().map(|r| r.value()),
            tracked: body.map(|b| b.tracked_bodies),
            body_frames: body.map(|b| b.frames_written),
            color_frames: self.color_stats.as_ref().map(|s| s.snapshot().frames_written),
            skipped: self.skipped.as_ref().map_or(0, |s| s.load(Ordering::Relaxed)),
            elapsed,
        }
    }
}

pub fn format_status(s: &StatusSnapshot) -> String {
    let mut parts = Vec::new();
    let secs = s.elapsed.as_secs();
    parts.push(format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60));
    if let Some(fps) = s.body_fps {
        parts.push(format!("body {:5.1} fps", fps));
    }
    if let Some(tracked) = s.tracked {
        parts.push(format!("tracked {}", tracked));
    }
    if let Some(fps) = s.color_fps {
        parts.push(format!("color {:5.1} fps", fps));
    }
    match (s.body_frames, s.color_frames) {
        (Some(b), Some(c)) => parts.push(format!("saved {}/{}", b, c)),
        (Some(n), None) | (None, Some(n)) => parts.push(format!("saved {}", n)),
        (None, None) => {}
    }
    if s.skipped > 0 {
        parts.push(format!("gaps {}", s.skipped));
    }
    parts.push("[q] stop".to_string());
    parts.join(" | ")
}

/// Redraws the status line on its own timer thread.
pub struct StatusReporter {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusReporter {
    pub fn spawn<W>(period: Duration, counters: StatusCounters, mut sink: W) -> Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(period);
        let started = Instant::now();

        let handle = thread::Builder::new().name("status".to_string()).spawn(move || loop {
            select! {
                recv(ticker) -> _ => {
                    let line = format_status(&counters.snapshot(started.elapsed()));
                    let drawn = queue!(sink, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(line))
                        .and_then(|_| sink.flush());
                    if let Err(e) = drawn {
                        log::warn!("status line write failed: {}", e);
                    }
                }
                recv(stop_rx) -> _ => break,
            }
        })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
