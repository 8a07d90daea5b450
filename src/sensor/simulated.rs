//! Software stand-in for the depth-sensor runtime.
//!
//! Produces a swaying skeleton and a moving YUY2 test pattern at configurable
//! rates, delivering arrivals on reader-owned threads the way the device
//! runtime does. Color buffers come from a bounded [`BufferPool`], so a
//! consumer that holds on to frames starves the stream.

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use super::frame::{Body, BodyFrame, CameraSpacePoint, ColorFrame, JointType, PixelFormat, TrackingState, Vector4};
use super::pool::BufferPool;
use super::{
    ArrivalHandler, FrameArrival, FrameLease, FrameReader, Sensor, SensorError, StreamKind, StreamSet,
    SubscriptionId,
};
use crate::shared::config::CaptureConfig;
use crate::shared::constants::BODY_COUNT;
use crate::sync::{FrameRateTracker, Pacer, RateMode, StreamClock};

/// Seconds between delivered-rate reports in the debug log.
const REPORT_PERIOD_SECS: f64 = 5.0;

/// Offsets of each joint from the spine base, metres, standing pose.
const SKELETON: [(f32, f32); 25] = [
    (0.00, 0.00),   // SpineBase
    (0.00, 0.30),   // SpineMid
    (0.00, 0.60),   // Neck
    (0.00, 0.72),   // Head
    (-0.18, 0.52),  // ShoulderLeft
    (-0.30, 0.28),  // ElbowLeft
    (-0.36, 0.05),  // WristLeft
    (-0.38, -0.02), // HandLeft
    (0.18, 0.52),   // ShoulderRight
    (0.30, 0.28),   // ElbowRight
    (0.36, 0.05),   // WristRight
    (0.38, -0.02),  // HandRight
    (-0.09, -0.05), // HipLeft
    (-0.10, -0.45), // KneeLeft
    (-0.10, -0.85), // AnkleLeft
    (-0.10, -0.92), // FootLeft
    (0.09, -0.05),  // HipRight
    (0.10, -0.45),  // KneeRight
    (0.10, -0.85),  // AnkleRight
    (0.10, -0.92),  // FootRight
    (0.00, 0.52),   // SpineShoulder
    (-0.40, -0.10), // HandTipLeft
    (-0.33, -0.02), // ThumbLeft
    (0.40, -0.10),  // HandTipRight
    (0.33, -0.02),  // ThumbRight
];

#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    pub body_fps: f64,
    pub color_fps: f64,
    pub color_width: u32,
    pub color_height: u32,
    pub tracked_bodies: usize,
    /// Every Nth tick delivers no frame (0 disables).
    pub gap_every: u64,
    pub buffer_pool: usize,
    /// False simulates an unplugged device.
    pub available: bool,
}

impl From<&CaptureConfig> for SimulatedConfig {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            body_fps: config.body_fps,
            color_fps: config.color_fps,
            color_width: config.color_width,
            color_height: config.color_height,
            tracked_bodies: config.simulated_bodies.min(BODY_COUNT),
            gap_every: config.simulated_gap_every,
            buffer_pool: config.buffer_pool,
            available: true,
        }
    }
}

pub struct SimulatedSensor {
    config: SimulatedConfig,
    open: AtomicBool,
    clock: Mutex<Option<StreamClock>>,
    pool: BufferPool,
}

impl SimulatedSensor {
    pub fn new(config: SimulatedConfig) -> Self {
        let frame_len = ColorFrame::expected_len(config.color_width, config.color_height, PixelFormat::Yuy2);
        let pool = BufferPool::new(config.buffer_pool, frame_len);
        Self {
            config,
            open: AtomicBool::new(false),
            clock: Mutex::new(None),
            pool,
        }
    }

    fn clock(&self) -> Result<StreamClock, SensorError> {
        let guard = match self.clock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.ok_or_else(|| SensorError::Unavailable("sensor is not open".to_string()))
    }

    fn spawn_reader(&self, streams: StreamSet) -> Result<Box<dyn FrameReader>, SensorError> {
        if !self.is_open() {
            return Err(SensorError::ReaderRefused {
                streams,
                reason: "sensor is not open".to_string(),
            });
        }
        // A synchronized reader runs at the pace of its slowest stream.
        let fps = streams
            .iter()
            .map(|kind| match kind {
                StreamKind::Body => self.config.body_fps,
                StreamKind::Color => self.config.color_fps,
            })
            .fold(f64::INFINITY, f64::min);
        let generator = Generator {
            streams,
            clock: self.clock()?,
            config: self.config.clone(),
            pool: self.pool.clone(),
        };
        Ok(Box::new(SimulatedReader::start(generator, fps)))
    }
}

impl Sensor for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self) -> Result<(), SensorError> {
        if !self.config.available {
            return Err(SensorError::Unavailable("no device attached".to_string()));
        }
        let mut clock = match self.clock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if clock.is_none() {
            *clock = Some(StreamClock::new());
            log::info!(
                "simulated sensor open: body {:.1} fps, color {}x{} @ {:.1} fps",
                self.config.body_fps,
                self.config.color_width,
                self.config.color_height,
                self.config.color_fps
            );
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn open_multi_source_reader(&self, streams: StreamSet) -> Result<Box<dyn FrameReader>, SensorError> {
        self.spawn_reader(streams)
    }

    fn open_reader(&self, kind: StreamKind) -> Result<Box<dyn FrameReader>, SensorError> {
        self.spawn_reader(kind.into())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Ok(mut clock) = self.clock.lock() {
                *clock = None;
            }
            log::info!("simulated sensor closed");
        }
    }
}

/// Builds the content of one tick.
struct Generator {
    streams: StreamSet,
    clock: StreamClock,
    config: SimulatedConfig,
    pool: BufferPool,
}

impl Generator {
    fn arrival(&self, tick: u64) -> SimulatedArrival {
        let gap = self.config.gap_every > 0 && tick % self.config.gap_every == 0;
        let relative_time = self.clock.elapsed();
        let body = (self.streams.contains(StreamKind::Body) && !gap).then(|| BodyFrame {
            relative_time,
            bodies: synthesize_bodies(relative_time, self.config.tracked_bodies),
        });
        let color = (self.streams.contains(StreamKind::Color) && !gap).then(|| ColorRequest {
            relative_time,
            tick,
            width: self.config.color_width,
            height: self.config.color_height,
            pool: self.pool.clone(),
        });
        SimulatedArrival { body, color }
    }
}

fn synthesize_bodies(t: Duration, tracked: usize) -> Vec<Body> {
    let secs = t.as_secs_f32();
    (0..BODY_COUNT)
        .map(|slot| {
            let mut body = Body::untracked();
            if slot >= tracked {
                return body;
            }
            body.is_tracked = true;
            body.tracking_id = 72057594037927936 + slot as u64;
            let sway = (secs * 1.5 + slot as f32).sin() * 0.05;
            let base_x = slot as f32 * 0.8 - 0.4;
            let half_angle = sway * 0.5;
            for joint in JointType::ALL {
                let (dx, dy) = SKELETON[joint.id() as usize];
                let entry = &mut body.joints[joint.id() as usize];
                entry.position = CameraSpacePoint {
                    x: base_x + dx + sway * (dy + 1.0),
                    y: dy,
                    z: 2.2 + slot as f32 * 0.3,
                };
                entry.orientation = Vector4 {
                    x: 0.0,
                    y: 0.0,
                    z: half_angle.sin(),
                    w: half_angle.cos(),
                };
                // Hand tips and thumbs flicker between inferred and tracked.
                entry.tracking_state = match joint {
                    JointType::HandTipLeft | JointType::ThumbLeft | JointType::HandTipRight | JointType::ThumbRight
                        if (secs * 4.0) as u64 % 3 == 0 =>
                    {
                        TrackingState::Inferred
                    }
                    _ => TrackingState::Tracked,
                };
            }
            body
        })
        .collect()
}

struct ColorRequest {
    relative_time: Duration,
    tick: u64,
    width: u32,
    height: u32,
    pool: BufferPool,
}

struct SimulatedArrival {
    body: Option<BodyFrame>,
    color: Option<ColorRequest>,
}

impl FrameArrival for SimulatedArrival {
    fn acquire_body(&self) -> Option<FrameLease<BodyFrame>> {
        self.body.clone().map(FrameLease::unpooled)
    }

    fn acquire_color(&self) -> Option<FrameLease<ColorFrame>> {
        let request = self.color.as_ref()?;
        let mut data = request.pool.take()?;
        paint_test_pattern(&mut data, request.width as usize, request.tick);
        let frame = ColorFrame {
            relative_time: request.relative_time,
            width: request.width,
            height: request.height,
            format: PixelFormat::Yuy2,
            data,
        };
        let pool = request.pool.clone();
        Some(FrameLease::new(frame, move |frame: &mut ColorFrame| {
            pool.give_back(std::mem::take(&mut frame.data));
        }))
    }
}

/// Vertical luma bars scrolling right one step per tick, neutral chroma.
fn paint_test_pattern(data: &mut [u8], width: usize, tick: u64) {
    let row_len = width * 2;
    if row_len == 0 || data.len() < row_len {
        return;
    }
    let shift = (tick as usize * 8) % width.max(1);
    let (first, rest) = data.split_at_mut(row_len);
    for (pair, yuyv) in first.chunks_exact_mut(4).enumerate() {
        let x = pair * 2 + shift;
        let luma = if (x / 64) % 2 == 0 { 200 } else { 40 };
        yuyv.copy_from_slice(&[luma, 128, luma, 128]);
    }
    for row in rest.chunks_exact_mut(row_len) {
        row.copy_from_slice(first);
    }
}

type Subscribers = Arc<Mutex<Vec<(SubscriptionId, ArrivalHandler)>>>;

pub struct SimulatedReader {
    streams: StreamSet,
    subscribers: Subscribers,
    next_id: AtomicU64,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl SimulatedReader {
    fn start(generator: Generator, fps: f64) -> Self {
        let streams = generator.streams;
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let subs = subscribers.clone();

        let handle = thread::Builder::new()
            .name(format!("reader-{}", streams))
            .spawn(move || {
                log::debug!("reader thread for {} started", generator.streams);
                let mut pacer = Pacer::new(fps);
                let mut delivered = FrameRateTracker::new(RateMode::Instant);
                let report_every = (fps * REPORT_PERIOD_SECS).max(1.0) as u64;
                while pacer.wait_for_next_tick(&stop_rx) {
                    let handlers: Vec<ArrivalHandler> = match subs.lock() {
                        Ok(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                        Err(poisoned) => poisoned.into_inner().iter().map(|(_, h)| h.clone()).collect(),
                    };
                    if handlers.is_empty() {
                        continue;
                    }
                    let arrival = generator.arrival(pacer.ticks());
                    for handler in handlers {
                        handler(&arrival as &dyn FrameArrival);
                    }
                    delivered.tick();
                    if delivered.total() % report_every == 0 {
                        log::debug!("reader {} delivering {:.1} fps", generator.streams, delivered.sample(true));
                    }
                }
                log::debug!(
                    "reader thread for {} exiting after {} ticks, {} delivered ({} resyncs)",
                    generator.streams,
                    pacer.ticks(),
                    delivered.total(),
                    pacer.resyncs()
                );
            });

        let (handle, thread_id) = match handle {
            Ok(h) => {
                let id = h.thread().id();
                (Some(h), Some(id))
            }
            Err(e) => {
                log::error!("failed to spawn reader thread: {}", e);
                (None, None)
            }
        };

        Self {
            streams,
            subscribers,
            next_id: AtomicU64::new(1),
            stop: Some(stop_tx),
            handle,
            thread_id,
        }
    }
}

impl FrameReader for SimulatedReader {
    fn streams(&self) -> StreamSet {
        self.streams
    }

    fn subscribe(&mut self, handler: ArrivalHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut list) = self.subscribers.lock() {
            list.push((id, handler));
        }
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Ok(mut list) = self.subscribers.lock() {
            list.retain(|(sid, _)| *sid != id);
        }
    }

    fn dispose(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if Some(thread::current().id()) == self.thread_id {
                // Disposed from inside an arrival; the loop sees the stop
                // signal once this arrival returns.
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for SimulatedReader {
    fn drop(&mut self) {
        self.dispose();
    }
}
