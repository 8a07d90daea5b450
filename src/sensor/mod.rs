//! Boundary to the depth-sensor runtime.
//!
//! The runtime owns frame acquisition and buffering. Readers deliver arrival
//! events on runtime threads; each arrival hands out [`FrameLease`]s that
//! must be dropped before the handler returns so the runtime can reuse the
//! underlying buffers.

pub mod frame;
pub mod pool;
pub mod simulated;

#[cfg(test)]
pub mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, Deref};
use std::sync::Arc;
use thiserror::Error;

pub use frame::{BodyFrame, ColorFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Body,
    Color,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Body, StreamKind::Color];

    fn bit(self) -> u8 {
        match self {
            StreamKind::Body => 0b01,
            StreamKind::Color => 0b10,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Body => f.write_str("body"),
            StreamKind::Color => f.write_str("color"),
        }
    }
}

/// Set of requested streams, computed once when a source is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSet(u8);

impl StreamSet {
    pub const EMPTY: StreamSet = StreamSet(0);
    pub const BODY: StreamSet = StreamSet(0b01);
    pub const COLOR: StreamSet = StreamSet(0b10);
    pub const ALL: StreamSet = StreamSet(0b11);

    pub fn from_flags(body: bool, color: bool) -> Self {
        let mut set = Self::EMPTY;
        if body {
            set.insert(StreamKind::Body);
        }
        if color {
            set.insert(StreamKind::Color);
        }
        set
    }

    pub fn insert(&mut self, kind: StreamKind) {
        self.0 |= kind.bit();
    }

    pub fn contains(self, kind: StreamKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = StreamKind> {
        StreamKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl BitOr for StreamSet {
    type Output = StreamSet;

    fn bitor(self, rhs: Self) -> Self::Output {
        StreamSet(self.0 | rhs.0)
    }
}

impl From<StreamKind> for StreamSet {
    fn from(kind: StreamKind) -> Self {
        StreamSet(kind.bit())
    }
}

impl fmt::Display for StreamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|k| k.to_string()).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}

/// Acquisition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// One multiplexed reader; every arrival carries all requested streams.
    Synchronized,
    /// One reader per stream, each at its native rate.
    Independent,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Synchronized => f.write_str("synchronized"),
            SyncMode::Independent => f.write_str("independent"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("reader for {streams} refused: {reason}")]
    ReaderRefused { streams: StreamSet, reason: String },
}

/// A frame handle that runs its release callback exactly once, when dropped.
pub struct FrameLease<T> {
    frame: T,
    release: Option<Box<dyn FnOnce(&mut T) + Send>>,
}

impl<T> FrameLease<T> {
    pub fn new(frame: T, release: impl FnOnce(&mut T) + Send + 'static) -> Self {
        Self {
            frame,
            release: Some(Box::new(release)),
        }
    }

    /// A lease with nothing to hand back to the runtime.
    pub fn unpooled(frame: T) -> Self {
        Self { frame, release: None }
    }
}

impl<T> Deref for FrameLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.frame
    }
}

impl<T> Drop for FrameLease<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(&mut self.frame);
        }
    }
}

/// One tick delivered by a reader. Streams the runtime skipped this tick
/// come back as `None`.
pub trait FrameArrival {
    fn acquire_body(&self) -> Option<FrameLease<BodyFrame>>;
    fn acquire_color(&self) -> Option<FrameLease<ColorFrame>>;
}

pub type ArrivalHandler = Arc<dyn Fn(&dyn FrameArrival) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub trait FrameReader: Send {
    /// Streams this reader delivers.
    fn streams(&self) -> StreamSet;
    fn subscribe(&mut self, handler: ArrivalHandler) -> SubscriptionId;
    fn unsubscribe(&mut self, id: SubscriptionId);
    /// Stops delivery. Arrivals already running are allowed to finish; when
    /// called from the reader's own thread it does not wait for itself.
    fn dispose(&mut self);
}

pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;
    /// Obtains the sensor handle. Idempotent.
    fn open(&self) -> Result<(), SensorError>;
    fn is_open(&self) -> bool;
    fn open_multi_source_reader(&self, streams: StreamSet) -> Result<Box<dyn FrameReader>, SensorError>;
    fn open_reader(&self, kind: StreamKind) -> Result<Box<dyn FrameReader>, SensorError>;
    fn close(&self);
}
