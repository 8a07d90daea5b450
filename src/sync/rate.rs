use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a tracker publishes its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateMode {
    /// The first tick after a full window publishes `count / elapsed` and
    /// starts a new window. Smooth, updates at most once per window.
    Windowed(Duration),
    /// Computes `count / elapsed` on every sample. Noisy but sub-second.
    Instant,
}

/// Rolling frames-per-second counter.
#[derive(Debug, Clone)]
pub struct FrameRateTracker {
    mode: RateMode,
    count: u64,
    total: u64,
    window_start: Instant,
    published: f64,
}

impl FrameRateTracker {
    pub fn new(mode: RateMode) -> Self {
        Self::starting_at(mode, Instant::now())
    }

    pub fn starting_at(mode: RateMode, start: Instant) -> Self {
        Self {
            mode,
            count: 0,
            total: 0,
            window_start: start,
            published: 0.0,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        if let RateMode::Windowed(window) = self.mode {
            let elapsed = now.saturating_duration_since(self.window_start);
            if elapsed >= window {
                self.published = rate(self.count, elapsed);
                self.restart(now);
            }
        }
        self.count += 1;
        self.total += 1;
    }

    pub fn sample(&mut self, reset: bool) -> f64 {
        self.sample_at(Instant::now(), reset)
    }

    /// Windowed trackers ignore `reset` and are not modified; see [`value_at`](Self::value_at).
    pub fn sample_at(&mut self, now: Instant, reset: bool) -> f64 {
        match self.mode {
            RateMode::Windowed(_) => self.value_at(now),
            RateMode::Instant => {
                let value = self.value_at(now);
                self.published = value;
                if reset {
                    self.restart(now);
                }
                value
            }
        }
    }

    /// Current rate without touching the window. A windowed tracker whose
    /// window ran out with no tick to close it reports the pending window, so
    /// a stalled stream decays towards zero.
    pub fn value_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.window_start);
        match self.mode {
            RateMode::Windowed(window) if elapsed < window => self.published,
            _ => rate(self.count, elapsed),
        }
    }

    /// Ticks since the tracker was created.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.restart(now);
        self.published = 0.0;
    }

    fn restart(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = now;
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Tracker shared between a frame callback thread (ticks) and the status
/// thread (reads).
#[derive(Debug, Clone)]
pub struct SharedRate {
    inner: Arc<Mutex<FrameRateTracker>>,
}

impl SharedRate {
    pub fn new(mode: RateMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FrameRateTracker::new(mode))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FrameRateTracker> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn tick(&self) {
        self.lock().tick();
    }

    /// Read-only; never moves the window.
    pub fn value(&self) -> f64 {
        self.lock().value_at(Instant::now())
    }

    pub fn total(&self) -> u64 {
        self.lock().total()
    }

    pub fn reset(&self) {
        self.lock().reset_at(Instant::now());
    }
}
