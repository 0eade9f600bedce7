use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::Instant;

/// Coarse millisecond clock relative to the first time it is read.
///
/// Only millisecond granularity is needed by the watchdog, so the value is
/// truncated once here instead of carrying `Duration`s through every reader.
pub fn coarse_now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

#[derive(Debug, Default, Clone, Copy)]
struct StopwatchState {
    accumulated_ms: u64,
    started_at: Option<u64>,
}

impl StopwatchState {
    fn elapsed_at(&self, now: u64) -> u64 {
        match self.started_at {
            Some(start) => self.accumulated_ms + now.saturating_sub(start),
            None => self.accumulated_ms,
        }
    }
}

/// Elapsed-time counter that can be driven and read from any thread.
///
/// Every accessor takes a short `parking_lot` lock (which spins before it
/// parks), so a reader never observes a half-updated start/accumulated pair.
#[derive(Debug, Default)]
pub struct Stopwatch {
    state: Mutex<StopwatchState>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stopwatch that is already running
    pub fn start_new() -> Self {
        let stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start or continue measuring. No effect if already running.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.started_at.is_none() {
            state.started_at = Some(coarse_now_ms());
        }
    }

    /// Stop measuring, keeping the accumulated time
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(start) = state.started_at.take() {
            state.accumulated_ms += coarse_now_ms().saturating_sub(start);
        }
    }

    /// Stop and clear the accumulated time
    pub fn reset(&self) {
        *self.state.lock() = StopwatchState::default();
    }

    /// Clear the accumulated time and start measuring again
    pub fn restart(&self) {
        let mut state = self.state.lock();
        state.accumulated_ms = 0;
        state.started_at = Some(coarse_now_ms());
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().started_at.is_some()
    }

    pub fn elapsed_ms(&self) -> u64 {
        let state = self.state.lock();
        state.elapsed_at(coarse_now_ms())
    }
}
