use anyhow::{bail, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::frame_source::{FrameSource, OpenedReaders, SensorHandle};
use super::status::{StatusCounters, StatusReporter};
use crate::recorder::{BodyWriter, ColorWriter};
use crate::sensor::simulated::{SimulatedConfig, SimulatedSensor};
use crate::sensor::StreamSet;
use crate::shared::config::CaptureConfig;
use crate::sync::TimeAnchor;
use crate::utils::file_utils::{self, OutputPaths};
use crate::utils::terminal_control::{self, RawModeGuard, StopReason};

/// One recording: writers, frame source and the shutdown channel that error
/// events, signals and keys all feed.
pub struct CaptureSession {
    config: CaptureConfig,
    paths: OutputPaths,
    source: FrameSource,
    counters: StatusCounters,
    errors: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Sender<String>,
    shutdown_rx: Receiver<String>,
    started: Option<Instant>,
}

/// What a finished session prints.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub elapsed: Duration,
    pub stop: StopReason,
    /// Record path and frames written, per recorded stream.
    pub body: Option<(String, u64)>,
    pub color: Option<(String, u64)>,
    pub skipped: u64,
    /// Every error reported while capturing or finishing, in order.
    pub errors: Vec<String>,
}

impl CaptureSession {
    /// Creates the record files and wires writers and events. Nothing runs
    /// until [`start`](Self::start).
    pub fn new(config: CaptureConfig, paths: OutputPaths, sensor: SensorHandle) -> Result<Self> {
        let source = FrameSource::new(sensor);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::unbounded();
        let mut counters = StatusCounters {
            skipped: Some(source.skipped_counter()),
            ..StatusCounters::default()
        };

        let anchor = Arc::new(TimeAnchor::new());
        let first = anchor.clone();
        source.on_first_frame(move |at| {
            if first.set(at) {
                log::info!("first frame at {:?} sensor time", at);
            }
        });

        let errors = Arc::new(Mutex::new(Vec::new()));
        let reported = errors.clone();
        let tx = shutdown_tx.clone();
        source.on_error(move |err| {
            log::error!("capture error: {:#}", err);
            eprint!("\r\nError: {:#}\r\n", err);
            let message = format!("{:#}", err);
            reported.lock().unwrap_or_else(|e| e.into_inner()).push(message.clone());
            let _ = tx.send(message);
        });

        let body = if config.record_skeleton {
            Some(BodyWriter::create(&paths.body, anchor.clone())?)
        } else {
            None
        };
        let color = match config
            .record_video
            .then(|| ColorWriter::create(&paths.color, config.color_width, config.color_height))
            .transpose()
        {
            Ok(color) => color,
            Err(err) => {
                if body.is_some() {
                    drop(body);
                    if let Err(rm) = fs::remove_file(&paths.body) {
                        log::warn!("could not remove {}: {}", paths.body.display(), rm);
                    }
                }
                return Err(err);
            }
        };

        if let Some(writer) = body {
            counters.body_stats = Some(writer.stats());
            counters.body_rate = Some(source.body_rate());
            source.add_consumer(Box::new(writer));
        }
        if let Some(writer) = color {
            counters.color_stats = Some(writer.stats());
            counters.color_rate = Some(source.color_rate());
            source.add_consumer(Box::new(writer));
        }

        Ok(Self {
            config,
            paths,
            source,
            counters,
            errors,
            shutdown_tx,
            shutdown_rx,
            started: None,
        })
    }

    pub fn requested(&self) -> StreamSet {
        StreamSet::from_flags(self.config.record_skeleton, self.config.record_video)
    }

    /// Opens the sensor and readers. On failure everything opened so far is
    /// released and the session must not be waited on.
    pub fn start(&mut self) -> Result<OpenedReaders> {
        match self.source.open(self.requested(), self.config.sync_mode) {
            Ok(opened) => {
                self.started = Some(Instant::now());
                Ok(opened)
            }
            Err(err) => {
                self.source.close();
                Err(err).context("failed to start capture")
            }
        }
    }

    pub fn shutdown_sender(&self) -> Sender<String> {
        self.shutdown_tx.clone()
    }

    pub fn counters(&self) -> StatusCounters {
        self.counters.clone()
    }

    #[cfg(test)]
    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    pub fn wait(&self, read_keys: bool) -> Result<StopReason> {
        terminal_control::wait_for_stop(&self.shutdown_rx, read_keys)
    }

    /// Closes the source, which flushes the writers and releases the sensor.
    pub fn finish(self, stop: StopReason) -> SessionSummary {
        if self.source.is_open() {
            log::info!("stopping capture: {:?}", stop);
        }
        self.source.close();
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        let path = |p: &std::path::Path| p.display().to_string();
        SessionSummary {
            elapsed,
            stop,
            body: self
                .counters
                .body_stats
                .as_ref()
                .map(|s| (path(&self.paths.body), s.snapshot().frames_written)),
            color: self
                .counters
                .color_stats
                .as_ref()
                .map(|s| (path(&self.paths.color), s.snapshot().frames_written)),
            skipped: self.source.skipped_ticks(),
            errors: self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

impl SessionSummary {
    fn average(&self, frames: u64) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            frames as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = match &self.stop {
            StopReason::Key => "stopped by user".to_string(),
            StopReason::Requested(reason) => format!("stopped: {}", reason),
        };
        writeln!(f, "Recorded {:.1}s ({})", self.elapsed.as_secs_f64(), stop)?;
        if let Some((path, frames)) = &self.body {
            writeln!(f, "  body:  {} frames, {:.1} fps -> {}", frames, self.average(*frames), path)?;
        }
        if let Some((path, frames)) = &self.color {
            writeln!(f, "  color: {} frames, {:.1} fps -> {}", frames, self.average(*frames), path)?;
        }
        write!(f, "  skipped ticks: {}", self.skipped)?;
        for err in &self.errors {
            write!(f, "\n  error: {}", err)?;
        }
        Ok(())
    }
}

fn setup_failed(err: anyhow::Error) -> anyhow::Error {
    log::error!("setup failed: {:#}", err);
    err
}

/// Records from the simulated sensor until a stop key, an interrupt or a
/// capture error.
pub fn run(name: &str, config: CaptureConfig) -> Result<SessionSummary> {
    let paths = file_utils::output_paths(&config.output_prefix, name).map_err(setup_failed)?;
    let sensor = Arc::new(SimulatedSensor::new(SimulatedConfig::from(&config)));
    let period = Duration::from_millis(config.status_period_ms.max(1));

    let mut session = CaptureSession::new(config, paths, SensorHandle::Owned(sensor)).map_err(setup_failed)?;
    let opened = session.start().map_err(setup_failed)?;
    log::info!("recording {} with {} reader(s)", session.requested(), opened.readers.len());

    let tx = session.shutdown_sender();
    ctrlc::set_handler(move || {
        let _ = tx.send("interrupted".to_string());
    })?;

    let stop = {
        let guard = RawModeGuard::enable()?;
        let mut status = StatusReporter::spawn(period, session.counters(), io::stdout())?;
        let stop = session.wait(guard.is_active());
        status.stop();
        stop
    };
    println!();

    let summary = session.finish(stop.unwrap_or_else(|e| StopReason::Requested(format!("{:#}", e))));
    log::info!("{}", summary);
    println!("{}", summary);
    if !summary.errors.is_empty() {
        bail!("capture finished with {} error(s)", summary.errors.len());
    }
    Ok(summary)
}
