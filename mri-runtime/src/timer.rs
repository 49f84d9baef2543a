//! Elapsed-time accumulator attached to every execution node.
//!
//! A `Timer` is a cheap, cloneable handle. The instrumentation layer starts and
//! stops it around the wrapped call while the report builder reads it from
//! another thread, so the state sits behind a mutex. Start/stop cycles
//! accumulate; reading a running timer includes the time since the last start.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TimerState {
    started_at: Option<Instant>,
    accumulated_ns: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Timer {
    state: Arc<Mutex<TimerState>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stopped timer that already holds `elapsed`.
    #[cfg(any(test, feature = "_test_internals"))]
    pub fn with_elapsed(elapsed: Duration) -> Self {
        let timer = Self::new();
        timer.lock().accumulated_ns = elapsed.as_nanos() as u64;
        timer
    }

    /// Start a new cycle. No-op if already running.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.started_at.is_none() {
            state.started_at = Some(Instant::now());
        }
    }

    /// Close the current cycle and add it to the total. No-op if stopped.
    pub fn stop(&self) {
        let mut state = self.lock();
        if let Some(started) = state.started_at.take() {
            state.accumulated_ns += started.elapsed().as_nanos() as u64;
        }
    }

    /// Stop and discard everything accumulated so far.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.started_at = None;
        state.accumulated_ns = 0;
    }

    pub fn is_running(&self) -> bool {
        self.lock().started_at.is_some()
    }

    /// Total across all completed cycles plus the running one, if any.
    pub fn elapsed_ns(&self) -> u64 {
        let state = self.lock();
        match state.started_at {
            Some(started) => state.accumulated_ns + started.elapsed().as_nanos() as u64,
            None => state.accumulated_ns,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
