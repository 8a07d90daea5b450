//! Scripted sensor for unit tests: readers never tick on their own, tests push
//! arrivals through them synchronously and inspect what was acquired,
//! released, subscribed and disposed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::frame::{Body, BodyFrame, ColorFrame, JointType, PixelFormat, TrackingState};
use super::{
    ArrivalHandler, FrameArrival, FrameLease, FrameReader, Sensor, SensorError, StreamKind, StreamSet,
    SubscriptionId,
};

#[derive(Default)]
struct ReaderState {
    streams: StreamSet,
    multi: bool,
    subscribers: Mutex<Vec<(SubscriptionId, ArrivalHandler)>>,
    disposed: AtomicBool,
}

#[derive(Default)]
pub struct MockSensor {
    pub available: bool,
    /// Readers for these streams are refused.
    pub refuse: Mutex<StreamSet>,
    open: AtomicBool,
    closes: AtomicUsize,
    readers: Mutex<Vec<Arc<ReaderState>>>,
}

impl MockSensor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            ..Self::default()
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing(streams: StreamSet) -> Arc<Self> {
        Arc::new(Self {
            available: true,
            refuse: Mutex::new(streams),
            ..Self::default()
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// `(streams, multi_source)` for every reader opened so far.
    pub fn opened_readers(&self) -> Vec<(StreamSet, bool)> {
        self.readers.lock().unwrap().iter().map(|r| (r.streams, r.multi)).collect()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.readers
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.subscribers.lock().unwrap().len())
            .sum()
    }

    pub fn all_disposed(&self) -> bool {
        self.readers.lock().unwrap().iter().all(|r| r.disposed.load(Ordering::SeqCst))
    }

    /// Delivers `arrival` to the subscribers of reader `index`, on the caller's thread.
    pub fn deliver(&self, index: usize, arrival: &MockArrival) {
        let reader = self.readers.lock().unwrap()[index].clone();
        if reader.disposed.load(Ordering::SeqCst) {
            return;
        }
        let handlers: Vec<ArrivalHandler> =
            reader.subscribers.lock().unwrap().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(arrival as &dyn FrameArrival);
        }
    }

    fn make_reader(&self, streams: StreamSet, multi: bool) -> Result<Box<dyn FrameReader>, SensorError> {
        let refused = *self.refuse.lock().unwrap();
        if streams.iter().any(|k| refused.contains(k)) {
            return Err(SensorError::ReaderRefused {
                streams,
                reason: "scripted refusal".to_string(),
            });
        }
        let state = Arc::new(ReaderState {
            streams,
            multi,
            ..ReaderState::default()
        });
        self.readers.lock().unwrap().push(state.clone());
        Ok(Box::new(MockReader { state, next_id: 1 }))
    }
}

impl Sensor for MockSensor {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&self) -> Result<(), SensorError> {
        if !self.available {
            return Err(SensorError::Unavailable("scripted".to_string()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn open_multi_source_reader(&self, streams: StreamSet) -> Result<Box<dyn FrameReader>, SensorError> {
        self.make_reader(streams, true)
    }

    fn open_reader(&self, kind: StreamKind) -> Result<Box<dyn FrameReader>, SensorError> {
        self.make_reader(kind.into(), false)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockReader {
    state: Arc<ReaderState>,
    next_id: u64,
}

impl FrameReader for MockReader {
    fn streams(&self) -> StreamSet {
        self.state.streams
    }

    fn subscribe(&mut self, handler: ArrivalHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.state.subscribers.lock().unwrap().push((id, handler));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.state.subscribers.lock().unwrap().retain(|(sid, _)| *sid != id);
    }

    fn dispose(&mut self) {
        self.state.disposed.store(true, Ordering::SeqCst);
    }
}

/// One scripted tick. Counts acquisitions and releases across clones.
#[derive(Default)]
pub struct MockArrival {
    pub body: Option<BodyFrame>,
    pub color: Option<ColorFrame>,
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl MockArrival {
    pub fn body(frame: BodyFrame) -> Self {
        Self {
            body: Some(frame),
            ..Self::default()
        }
    }

    pub fn color(frame: ColorFrame) -> Self {
        Self {
            color: Some(frame),
            ..Self::default()
        }
    }

    pub fn both(body: BodyFrame, color: ColorFrame) -> Self {
        Self {
            body: Some(body),
            color: Some(color),
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn lease<T: Clone + Send + 'static>(&self, frame: &Option<T>) -> Option<FrameLease<T>> {
        let frame = frame.clone()?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        Some(FrameLease::new(frame, move |_| {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

impl FrameArrival for MockArrival {
    fn acquire_body(&self) -> Option<FrameLease<BodyFrame>> {
        self.lease(&self.body)
    }

    fn acquire_color(&self) -> Option<FrameLease<ColorFrame>> {
        self.lease(&self.color)
    }
}

/// A fully tracked body whose joint positions encode the joint id.
pub fn tracked_body(tracking_id: u64) -> Body {
    let mut body = Body::untracked();
    body.tracking_id = tracking_id;
    body.is_tracked = true;
    for joint in JointType::ALL {
        let entry = &mut body.joints[joint.id() as usize];
        entry.position.x = joint.id() as f32 * 0.01;
        entry.position.y = -0.5;
        entry.position.z = 2.25;
        entry.tracking_state = TrackingState::Tracked;
    }
    body
}

pub fn body_frame(millis: u64, bodies: Vec<Body>) -> BodyFrame {
    BodyFrame {
        relative_time: Duration::from_millis(millis),
        bodies,
    }
}

pub fn color_frame(millis: u64, width: u32, height: u32) -> ColorFrame {
    ColorFrame {
        relative_time: Duration::from_millis(millis),
        width,
        height,
        format: PixelFormat::Yuy2,
        data: vec![0x80; ColorFrame::expected_len(width, height, PixelFormat::Yuy2)],
    }
}
