//! Frame acquisition and fan-out.
//!
//! A [`FrameSource`] opens either one multiplexed reader (synchronized mode)
//! or one reader per requested stream (independent mode), and forwards every
//! arrival to the registered consumers in registration order. Frame leases
//! are dropped at the end of each arrival whatever the consumers did.

use anyhow::anyhow;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use thiserror::Error;

use super::consumer::FrameConsumer;
use crate::sensor::{
    FrameArrival, FrameReader, Sensor, SensorError, StreamKind, StreamSet, SubscriptionId, SyncMode,
};
use crate::shared::constants::RATE_WINDOW_MS;
use crate::sync::{RateMode, SharedRate};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no stream selected; request body, color or both")]
    NoStreamSelected,
    #[error("frame source already started")]
    AlreadyStarted,
    #[error("sensor unavailable")]
    SensorUnavailable(#[source] SensorError),
    #[error("failed to open frame reader")]
    ReaderOpenFailed(#[source] SensorError),
}

/// Whether the frame source closes the sensor when it closes.
pub enum SensorHandle {
    Owned(Arc<dyn Sensor>),
    /// Supplied by the caller, who stays responsible for closing it.
    External(Arc<dyn Sensor>),
}

impl SensorHandle {
    fn sensor(&self) -> &Arc<dyn Sensor> {
        match self {
            SensorHandle::Owned(s) | SensorHandle::External(s) => s,
        }
    }

    fn is_owned(&self) -> bool {
        matches!(self, SensorHandle::Owned(_))
    }
}

/// Readers opened by [`FrameSource::open`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedReaders {
    pub mode: SyncMode,
    pub readers: Vec<StreamSet>,
}

type FirstFrameHandler = Arc<dyn Fn(Duration) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
struct Events {
    first_frame: Mutex<Vec<FirstFrameHandler>>,
    error: Mutex<Vec<ErrorHandler>>,
}

impl Events {
    // Handlers are cloned out so they may call back into the source.
    fn emit_first_frame(&self, at: Duration) {
        let handlers: Vec<FirstFrameHandler> = lock(&self.first_frame).clone();
        for handler in handlers {
            handler(at);
        }
    }

    fn emit_error(&self, err: &anyhow::Error) {
        let handlers: Vec<ErrorHandler> = lock(&self.error).clone();
        for handler in handlers {
            handler(err);
        }
    }

    fn clear(&self) {
        lock(&self.first_frame).clear();
        lock(&self.error).clear();
    }
}

struct ConsumerSlot {
    name: String,
    streams: StreamSet,
    consumer: Mutex<Box<dyn FrameConsumer>>,
    faulted: AtomicBool,
}

/// Per-session dispatch state shared with the reader callbacks.
struct Dispatcher {
    consumers: Vec<Arc<ConsumerSlot>>,
    first_frame: OnceLock<Duration>,
    events: Arc<Events>,
    body_rate: SharedRate,
    color_rate: SharedRate,
    skipped: Arc<AtomicU64>,
    /// Set by `close` before consumers are finished; nothing is delivered after.
    closed: AtomicBool,
}

impl Dispatcher {
    fn handle_arrival(&self, arrival: &dyn FrameArrival, streams: StreamSet) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // Leases live until the end of this function, on every path.
        let body = if streams.contains(StreamKind::Body) {
            arrival.acquire_body()
        } else {
            None
        };
        let color = if streams.contains(StreamKind::Color) {
            arrival.acquire_color()
        } else {
            None
        };

        let missing = streams
            .iter()
            .filter(|kind| match kind {
                StreamKind::Body => body.is_none(),
                StreamKind::Color => color.is_none(),
            })
            .count();
        if missing > 0 {
            self.skipped.fetch_add(missing as u64, Ordering::Relaxed);
        }

        let first = body
            .as_ref()
            .map(|f| f.relative_time)
            .or_else(|| color.as_ref().map(|f| f.relative_time));
        let Some(first) = first else {
            return;
        };
        self.first_frame.get_or_init(|| {
            log::info!("first frame at {:?}", first);
            self.events.emit_first_frame(first);
            first
        });

        if let Some(frame) = &body {
            for slot in self.consumers.iter().filter(|s| s.streams.contains(StreamKind::Body)) {
                self.deliver(slot, StreamKind::Body, |c| c.on_body_frame(frame));
            }
            self.body_rate.tick();
        }
        // A consumer's error handler may have closed the source meanwhile.
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(frame) = &color {
            for slot in self.consumers.iter().filter(|s| s.streams.contains(StreamKind::Color)) {
                self.deliver(slot, StreamKind::Color, |c| c.on_color_frame(frame));
            }
            self.color_rate.tick();
        }
    }

    fn deliver<F>(&self, slot: &ConsumerSlot, kind: StreamKind, call: F)
    where
        F: FnOnce(&mut dyn FrameConsumer) -> anyhow::Result<()>,
    {
        if slot.faulted.load(Ordering::SeqCst) {
            return;
        }
        // The consumer lock is released before the error event fires.
        let outcome = {
            let mut consumer = lock(&slot.consumer);
            // Checked under the lock: `close` sets the flag before taking it to finish.
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            panic::catch_unwind(AssertUnwindSafe(|| call(consumer.as_mut())))
        };
        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(payload) => anyhow!("panicked: {}", panic_message(payload.as_ref())),
        };
        if slot.faulted.swap(true, Ordering::SeqCst) {
            return;
        }
        let err = err.context(format!("consumer '{}' failed on a {} frame", slot.name, kind));
        log::error!("{:#}", err);
        self.events.emit_error(&err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<Any>".to_string()
    }
}

struct Active {
    dispatcher: Arc<Dispatcher>,
    readers: Vec<(Box<dyn FrameReader>, SubscriptionId)>,
}

pub struct FrameSource {
    sensor: SensorHandle,
    consumers: Mutex<Vec<Arc<ConsumerSlot>>>,
    events: Arc<Events>,
    state: Mutex<Option<Active>>,
    body_rate: SharedRate,
    color_rate: SharedRate,
    skipped: Arc<AtomicU64>,
}

impl FrameSource {
    pub fn new(sensor: SensorHandle) -> Self {
        let window = RateMode::Windowed(Duration::from_millis(RATE_WINDOW_MS));
        Self {
            sensor,
            consumers: Mutex::new(Vec::new()),
            events: Arc::new(Events::default()),
            state: Mutex::new(None),
            body_rate: SharedRate::new(window),
            color_rate: SharedRate::new(window),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Consumers registered after `open` take effect on the next session.
    pub fn add_consumer(&self, consumer: Box<dyn FrameConsumer>) {
        let slot = ConsumerSlot {
            name: consumer.name().to_string(),
            streams: consumer.streams(),
            consumer: Mutex::new(consumer),
            faulted: AtomicBool::new(false),
        };
        lock(&self.consumers).push(Arc::new(slot));
    }

    /// Fires once per session with the relative time of the first frame.
    pub fn on_first_frame(&self, handler: impl Fn(Duration) + Send + Sync + 'static) {
        lock(&self.events.first_frame).push(Arc::new(handler));
    }

    pub fn on_error(&self, handler: impl Fn(&anyhow::Error) + Send + Sync + 'static) {
        lock(&self.events.error).push(Arc::new(handler));
    }

    pub fn open(&self, requested: StreamSet, mode: SyncMode) -> Result<OpenedReaders, SourceError> {
        if requested.is_empty() {
            return Err(SourceError::NoStreamSelected);
        }
        let mut state = lock(&self.state);
        if state.is_some() {
            return Err(SourceError::AlreadyStarted);
        }

        let sensor = self.sensor.sensor().clone();
        sensor.open().map_err(SourceError::SensorUnavailable)?;

        let mut readers = match open_readers(sensor.as_ref(), requested, mode) {
            Ok(readers) => readers,
            Err(err) => {
                if self.sensor.is_owned() {
                    sensor.close();
                }
                return Err(SourceError::ReaderOpenFailed(err));
            }
        };

        self.body_rate.reset();
        self.color_rate.reset();
        let dispatcher = Arc::new(Dispatcher {
            consumers: lock(&self.consumers).clone(),
            first_frame: OnceLock::new(),
            events: self.events.clone(),
            body_rate: self.body_rate.clone(),
            color_rate: self.color_rate.clone(),
            skipped: self.skipped.clone(),
            closed: AtomicBool::new(false),
        });
        for stream in requested.iter() {
            if !dispatcher.consumers.iter().any(|s| s.streams.contains(stream)) {
                log::warn!("{} stream requested without a consumer", stream);
            }
        }

        let opened = OpenedReaders {
            mode,
            readers: readers.iter().map(|r| r.streams()).collect(),
        };
        let subscribed: Vec<_> = readers
            .drain(..)
            .map(|mut reader| {
                let streams = reader.streams();
                let d = dispatcher.clone();
                let id = reader.subscribe(Arc::new(move |arrival: &dyn FrameArrival| {
                    d.handle_arrival(arrival, streams)
                }));
                (reader, id)
            })
            .collect();

        log::info!(
            "frame source open on {} sensor: {} ({}), readers {:?}",
            sensor.name(),
            requested,
            mode,
            opened.readers.iter().map(|r| r.to_string()).collect::<Vec<_>>()
        );
        *state = Some(Active {
            dispatcher,
            readers: subscribed,
        });
        Ok(opened)
    }

    /// Idempotent. Safe to call from an error handler, including on a reader
    /// thread: an arrival in progress stops dispatching and only releases its
    /// frames. A consumer whose `finish` fails is reported through the error
    /// event before the handlers are dropped.
    pub fn close(&self) {
        let active = lock(&self.state).take();
        if let Some(mut active) = active {
            active.dispatcher.closed.store(true, Ordering::SeqCst);
            for (reader, id) in active.readers.iter_mut() {
                reader.unsubscribe(*id);
                reader.dispose();
            }
            for slot in &active.dispatcher.consumers {
                let finished = lock(&slot.consumer).finish();
                if let Err(err) = finished {
                    let err = err.context(format!("consumer '{}' failed to finish", slot.name));
                    log::error!("{:#}", err);
                    self.events.emit_error(&err);
                }
            }
            if self.sensor.is_owned() {
                self.sensor.sensor().close();
            }
            log::info!(
                "frame source closed: {} body, {} color frames, {} skipped",
                self.body_rate.total(),
                self.color_rate.total(),
                self.skipped_ticks()
            );
        }
        lock(&self.consumers).clear();
        self.events.clear();
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).is_some()
    }

    pub fn body_rate(&self) -> SharedRate {
        self.body_rate.clone()
    }

    pub fn color_rate(&self) -> SharedRate {
        self.color_rate.clone()
    }

    /// Requested streams that arrived empty, summed over all ticks.
    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn skipped_counter(&self) -> Arc<AtomicU64> {
        self.skipped.clone()
    }

    #[cfg(test)]
    pub fn first_frame_time(&self) -> Option<Duration> {
        lock(&self.state)
            .as_ref()
            .and_then(|a| a.dispatcher.first_frame.get().copied())
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_readers(
    sensor: &dyn Sensor,
    requested: StreamSet,
    mode: SyncMode,
) -> Result<Vec<Box<dyn FrameReader>>, SensorError> {
    match mode {
        SyncMode::Synchronized => Ok(vec![sensor.open_multi_source_reader(requested)?]),
        SyncMode::Independent => {
            let mut readers: Vec<Box<dyn FrameReader>> = Vec::new();
            for kind in requested.iter() {
                match sensor.open_reader(kind) {
                    Ok(reader) => readers.push(reader),
                    Err(err) => {
                        for reader in readers.iter_mut() {
                            reader.dispose();
                        }
                        return Err(err);
                    }
                }
            }
            Ok(readers)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::test_support::SharedBuffer;
    use crate::recorder::BodyWriter;
    use crate::sensor::frame::{Body, BodyFrame, ColorFrame};
    use crate::sensor::mock::{body_frame, color_frame, tracked_body, MockArrival, MockSensor};
    use crate::sync::TimeAnchor;
    use std::sync::atomic::AtomicUsize;

    /// Counts frames; optionally fails or panics on the nth body frame.
    struct Counting {
        name: &'static str,
        streams: StreamSet,
        bodies: Arc<AtomicUsize>,
        colors: Arc<AtomicUsize>,
        fail_on: Option<usize>,
        panic_on: Option<usize>,
        fail_finish: bool,
        finished: Arc<AtomicUsize>,
    }

    impl Counting {
        fn new(name: &'static str, streams: StreamSet) -> Self {
            Self {
                name,
                streams,
                bodies: Arc::new(AtomicUsize::new(0)),
                colors: Arc::new(AtomicUsize::new(0)),
                fail_on: None,
                panic_on: None,
                fail_finish: false,
                finished: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FrameConsumer for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn streams(&self) -> StreamSet {
            self.streams
        }

        fn on_body_frame(&mut self, _frame: &BodyFrame) -> anyhow::Result<()> {
            let n = self.bodies.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_on == Some(n) {
                panic!("consumer panicked on frame {n}");
            }
            if self.fail_on == Some(n) {
                anyhow::bail!("disk full");
            }
            Ok(())
        }

        fn on_color_frame(&mut self, _frame: &ColorFrame) -> anyhow::Result<()> {
            self.colors.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail_finish {
                anyhow::bail!("flush failed");
            }
            Ok(())
        }
    }

    fn one_body(millis: u64) -> BodyFrame {
        body_frame(millis, vec![tracked_body(1), Body::untracked()])
    }

    #[test]
    fn empty_stream_set_is_rejected() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        for mode in [SyncMode::Synchronized, SyncMode::Independent] {
            assert!(matches!(source.open(StreamSet::EMPTY, mode), Err(SourceError::NoStreamSelected)));
        }
        assert!(sensor.opened_readers().is_empty());
        assert!(!sensor.is_open());
    }

    #[test]
    fn every_stream_combination_opens() {
        for requested in [StreamSet::BODY, StreamSet::COLOR, StreamSet::ALL] {
            let sensor = MockSensor::new();
            let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
            let opened = source.open(requested, SyncMode::Synchronized).unwrap();
            assert_eq!(opened.readers, vec![requested]);
            assert_eq!(sensor.opened_readers(), vec![(requested, true)]);
            source.close();

            let sensor = MockSensor::new();
            let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
            let opened = source.open(requested, SyncMode::Independent).unwrap();
            let expected: Vec<StreamSet> = requested.iter().map(StreamSet::from).collect();
            assert_eq!(opened.readers, expected);
            assert!(sensor.opened_readers().iter().all(|(_, multi)| !multi));
            source.close();
        }
    }

    #[test]
    fn missing_sensor_is_reported() {
        let sensor = MockSensor::unavailable();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        let err = source.open(StreamSet::ALL, SyncMode::Independent).unwrap_err();
        assert!(matches!(err, SourceError::SensorUnavailable(_)));
        assert!(!source.is_open());
    }

    #[test]
    fn refused_reader_rolls_back() {
        let sensor = MockSensor::refusing(StreamSet::COLOR);
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        let err = source.open(StreamSet::ALL, SyncMode::Independent).unwrap_err();
        assert!(matches!(err, SourceError::ReaderOpenFailed(_)));
        // Body reader opened first and was disposed again.
        assert_eq!(sensor.opened_readers(), vec![(StreamSet::BODY, false)]);
        assert!(sensor.all_disposed());
        assert_eq!(sensor.close_count(), 1);
        assert!(!source.is_open());

        // Body alone still works.
        assert!(source.open(StreamSet::BODY, SyncMode::Independent).is_ok());
    }

    #[test]
    fn refused_multi_source_reader_closes_owned_sensor() {
        for requested in [StreamSet::COLOR, StreamSet::ALL] {
            let sensor = MockSensor::refusing(StreamSet::COLOR);
            let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
            let err = source.open(requested, SyncMode::Synchronized).unwrap_err();
            assert!(matches!(err, SourceError::ReaderOpenFailed(_)));
            assert!(sensor.opened_readers().is_empty());
            assert_eq!(sensor.close_count(), 1);
            assert!(!sensor.is_open());
            assert!(!source.is_open());
        }
    }

    #[test]
    fn refused_reader_leaves_external_sensor_open() {
        for mode in [SyncMode::Synchronized, SyncMode::Independent] {
            let sensor = MockSensor::refusing(StreamSet::BODY);
            let source = FrameSource::new(SensorHandle::External(sensor.clone()));
            let err = source.open(StreamSet::ALL, mode).unwrap_err();
            assert!(matches!(err, SourceError::ReaderOpenFailed(_)));
            assert!(sensor.all_disposed());
            assert_eq!(sensor.close_count(), 0);
            assert!(sensor.is_open());
            assert!(!source.is_open());
        }
    }

    #[test]
    fn second_open_needs_close_in_between() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        source.open(StreamSet::BODY, SyncMode::Synchronized).unwrap();
        assert!(matches!(
            source.open(StreamSet::BODY, SyncMode::Synchronized),
            Err(SourceError::AlreadyStarted)
        ));
        source.close();
        assert!(source.open(StreamSet::COLOR, SyncMode::Synchronized).is_ok());
    }

    #[test]
    fn leases_released_once_even_when_consumers_fail() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));

        let mut failing = Counting::new("failing", StreamSet::ALL);
        failing.fail_on = Some(1);
        let mut panicking = Counting::new("panicking", StreamSet::BODY);
        panicking.panic_on = Some(2);
        let healthy = Counting::new("healthy", StreamSet::ALL);
        let failing_bodies = failing.bodies.clone();
        let panicking_bodies = panicking.bodies.clone();
        let healthy_bodies = healthy.bodies.clone();
        let healthy_colors = healthy.colors.clone();
        source.add_consumer(Box::new(failing));
        source.add_consumer(Box::new(panicking));
        source.add_consumer(Box::new(healthy));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        source.on_error(move |err| sink.lock().unwrap().push(format!("{:#}", err)));

        source.open(StreamSet::ALL, SyncMode::Synchronized).unwrap();
        for tick in 0..3u64 {
            let arrival = MockArrival::both(one_body(tick * 33), color_frame(tick * 33, 4, 2));
            sensor.deliver(0, &arrival);
            assert_eq!(arrival.acquired(), 2);
            assert_eq!(arrival.released(), 2);
        }

        // Faulted consumers are skipped after their failure.
        assert_eq!(failing_bodies.load(Ordering::SeqCst), 1);
        assert_eq!(panicking_bodies.load(Ordering::SeqCst), 2);
        assert_eq!(healthy_bodies.load(Ordering::SeqCst), 3);
        assert_eq!(healthy_colors.load(Ordering::SeqCst), 3);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("failing") && errors[0].contains("disk full"));
        assert!(errors[1].contains("panicking") && errors[1].contains("consumer panicked"));
        assert_eq!(source.body_rate().total(), 3);
    }

    #[test]
    fn first_frame_fires_once_per_session() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        source.on_first_frame(move |t| sink.lock().unwrap().push(t));
        source.open(StreamSet::ALL, SyncMode::Independent).unwrap();

        // Body reader ticks with no frame: not an error, no anchor yet.
        let empty = MockArrival::default();
        sensor.deliver(0, &empty);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(source.skipped_ticks(), 1);

        sensor.deliver(1, &MockArrival::color(color_frame(120, 2, 2)));
        sensor.deliver(0, &MockArrival::body(one_body(130)));
        sensor.deliver(1, &MockArrival::color(color_frame(153, 2, 2)));

        assert_eq!(*seen.lock().unwrap(), vec![Duration::from_millis(120)]);
        assert_eq!(source.first_frame_time(), Some(Duration::from_millis(120)));
    }

    #[test]
    fn body_only_independent_writes_one_line_per_joint() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        let anchor = Arc::new(TimeAnchor::new());
        let buffer = SharedBuffer::default();
        let writer = BodyWriter::new(buffer.clone(), anchor.clone()).unwrap();
        source.add_consumer(Box::new(writer));
        let a = anchor.clone();
        source.on_first_frame(move |t| {
            a.set(t);
        });

        let opened = source.open(StreamSet::BODY, SyncMode::Independent).unwrap();
        assert_eq!(opened.readers, vec![StreamSet::BODY]);
        assert_eq!(sensor.opened_readers(), vec![(StreamSet::BODY, false)]);

        sensor.deliver(0, &MockArrival::body(one_body(1_000)));
        source.close();

        let text = buffer.contents();
        let lines: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(lines.len(), 25);
        for (i, line) in lines.iter().enumerate() {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 10);
            assert_eq!(fields[0], "0.000");
            assert_eq!(fields[1], i.to_string());
        }
    }

    #[test]
    fn double_close_leaves_nothing_registered() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        let counting = Counting::new("counting", StreamSet::ALL);
        let finished = counting.finished.clone();
        source.add_consumer(Box::new(counting));
        source.on_error(|_| {});
        source.open(StreamSet::ALL, SyncMode::Independent).unwrap();
        assert_eq!(sensor.live_subscriptions(), 2);

        source.close();
        source.close();

        assert_eq!(sensor.live_subscriptions(), 0);
        assert!(sensor.all_disposed());
        assert_eq!(sensor.close_count(), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!source.is_open());
    }

    #[test]
    fn external_sensor_stays_open() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::External(sensor.clone()));
        source.open(StreamSet::COLOR, SyncMode::Synchronized).unwrap();
        source.close();
        assert_eq!(sensor.close_count(), 0);
        assert!(sensor.is_open());
    }

    #[test]
    fn close_from_error_handler() {
        let sensor = MockSensor::new();
        let source = Arc::new(FrameSource::new(SensorHandle::Owned(sensor.clone())));
        let mut failing = Counting::new("failing", StreamSet::BODY);
        failing.fail_on = Some(1);
        source.add_consumer(Box::new(failing));

        let weak = Arc::downgrade(&source);
        source.on_error(move |_| {
            if let Some(source) = weak.upgrade() {
                source.close();
            }
        });
        source.open(StreamSet::BODY, SyncMode::Synchronized).unwrap();

        let arrival = MockArrival::body(one_body(0));
        sensor.deliver(0, &arrival);
        assert_eq!(arrival.released(), 1);
        assert!(!source.is_open());
        assert_eq!(sensor.live_subscriptions(), 0);

        // Further arrivals on the disposed reader go nowhere.
        let late = MockArrival::body(one_body(33));
        sensor.deliver(0, &late);
        assert_eq!(late.acquired(), 0);
    }

    #[test]
    fn close_from_error_handler_stops_the_running_arrival() {
        let sensor = MockSensor::new();
        let source = Arc::new(FrameSource::new(SensorHandle::Owned(sensor.clone())));
        let mut failing = Counting::new("failing", StreamSet::BODY);
        failing.fail_on = Some(1);
        let late = Counting::new("late", StreamSet::ALL);
        let late_bodies = late.bodies.clone();
        let late_colors = late.colors.clone();
        let late_finished = late.finished.clone();
        source.add_consumer(Box::new(failing));
        source.add_consumer(Box::new(late));

        let weak = Arc::downgrade(&source);
        source.on_error(move |_| {
            if let Some(source) = weak.upgrade() {
                source.close();
            }
        });
        source.open(StreamSet::ALL, SyncMode::Synchronized).unwrap();

        let arrival = MockArrival::both(one_body(0), color_frame(0, 4, 2));
        sensor.deliver(0, &arrival);

        // The second consumer was finished by the handler and sees nothing after.
        assert_eq!(late_finished.load(Ordering::SeqCst), 1);
        assert_eq!(late_bodies.load(Ordering::SeqCst), 0);
        assert_eq!(late_colors.load(Ordering::SeqCst), 0);
        assert_eq!(arrival.acquired(), 2);
        assert_eq!(arrival.released(), 2);
        assert_eq!(source.color_rate().total(), 0);
    }

    #[test]
    fn failed_finish_is_reported_as_error() {
        let sensor = MockSensor::new();
        let source = FrameSource::new(SensorHandle::Owned(sensor.clone()));
        let mut flaky = Counting::new("flaky", StreamSet::BODY);
        flaky.fail_finish = true;
        source.add_consumer(Box::new(flaky));
        source.add_consumer(Box::new(Counting::new("fine", StreamSet::BODY)));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        source.on_error(move |err| sink.lock().unwrap().push(format!("{:#}", err)));

        source.open(StreamSet::BODY, SyncMode::Synchronized).unwrap();
        source.close();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("flaky") && errors[0].contains("flush failed"));
        assert_eq!(sensor.close_count(), 1);
    }
}
