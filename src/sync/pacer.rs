use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Fixed-rate tick pacing for a sensor stream.
///
/// Falls back into step when it lags more than a few periods behind, so a
/// stalled consumer does not produce a burst of catch-up ticks.
pub struct Pacer {
    period: Duration,
    next_tick: Instant,
    ticks: u64,
    resyncs: u64,
}

impl Pacer {
    pub fn new(fps: f64) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.max(0.1));
        Self {
            period,
            next_tick: Instant::now() + period,
            ticks: 0,
            resyncs: 0,
        }
    }

    /// Wait for the next tick or a stop signal.
    /// Returns false once stopped (signal received or sender dropped).
    pub fn wait_for_next_tick(&mut self, stop: &Receiver<()>) -> bool {
        let now = Instant::now();

        if now > self.next_tick + self.period * 3 {
            self.next_tick = now + self.period;
            self.resyncs += 1;
        } else if now < self.next_tick {
            match stop.recv_timeout(self.next_tick - now) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        if !stop.is_empty() {
            return false;
        }

        self.next_tick += self.period;
        self.ticks += 1;
        true
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}
