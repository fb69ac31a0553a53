//! Interactive prompt bridge between task logic and the presentation layer.
//!
//! Task logic occasionally needs user input mid-run ("press Enter to
//! continue", a verification code, ...). The blocking call happens on the
//! run's worker thread; the response arrives from the controlling context.
//! [`InputGate`] turns that into a request/response exchange: the worker
//! blocks on a condition variable in short slices so a stop request is
//! observed within ~100 ms, up to a hard 5-minute ceiling.

use crate::error::{AgentError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Slice width for the response wait; bounds stop-flag observation latency.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Hard ceiling on how long a prompt may stay unanswered.
pub const RESPONSE_CEILING: Duration = Duration::from_secs(300);

#[derive(Default)]
struct GateState {
    /// A request is outstanding and the worker is blocked.
    waiting: bool,
    /// Response provided by the controlling context, not yet consumed.
    response: Option<String>,
}

/// Shared request/response gate between a run's worker thread and the
/// controlling context.
///
/// At most one request may be outstanding at a time. The stop flag is shared
/// with the run state; setting it unblocks a pending wait with
/// [`AgentError::Terminated`].
pub struct InputGate {
    state: Mutex<GateState>,
    cond: Condvar,
    stop: Arc<AtomicBool>,
}

impl InputGate {
    /// Create a gate observing the given stop flag.
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
            stop,
        }
    }

    /// Returns `true` while a request is outstanding.
    pub fn is_waiting(&self) -> bool {
        self.lock_state().waiting
    }

    /// Deliver a response from the controlling context.
    ///
    /// Returns `true` if a waiter was pending and will receive it.
    pub fn provide(&self, response: impl Into<String>) -> bool {
        let mut state = self.lock_state();
        let delivered = state.waiting;
        state.response = Some(response.into());
        state.waiting = false;
        drop(state);
        self.cond.notify_all();
        delivered
    }

    /// Wake any pending waiter so it can observe the stop flag.
    pub fn notify_stop(&self) {
        self.cond.notify_all();
    }

    /// Block the worker until a response arrives, stop is requested, or the
    /// 5-minute ceiling elapses.
    pub fn wait_for_response(&self) -> Result<String> {
        self.wait_with_ceiling(RESPONSE_CEILING)
    }

    pub(crate) fn wait_with_ceiling(&self, ceiling: Duration) -> Result<String> {
        let deadline = Instant::now() + ceiling;
        let mut state = self.lock_state();
        if state.waiting {
            return Err(AgentError::Task(
                "an input request is already pending".to_owned(),
            ));
        }
        state.waiting = true;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                state.waiting = false;
                return Err(AgentError::Terminated);
            }
            if let Some(response) = state.response.take() {
                state.waiting = false;
                return Ok(response);
            }
            if Instant::now() >= deadline {
                state.waiting = false;
                return Err(AgentError::PromptTimeout);
            }
            let (next, _timed_out) = self
                .cond
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
