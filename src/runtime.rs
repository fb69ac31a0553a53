//! Runtime events emitted by the engine for the presentation layer.
//!
//! This is intentionally lightweight (strings and small enums) so the run
//! worker can emit events without blocking on the consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Phase of the run state machine.
///
/// Transitions: `Idle → Preparing → Running → {Completed | Terminated | Errored}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// No run active.
    Idle,
    /// Pre-hooks executing, task logic not yet started.
    Preparing,
    /// Task logic executing (including retry waits).
    Running,
    /// Task logic finished successfully.
    Completed,
    /// Run ended by a user stop request.
    Terminated,
    /// Task logic failed and the retry budget (if any) was exhausted.
    Errored,
}

impl RunPhase {
    /// Returns `true` for the three terminal phases.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Errored)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "Idle",
            Self::Preparing => "Preparing",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Terminated => "Terminated",
            Self::Errored => "Errored",
        };
        f.write_str(label)
    }
}

/// Events that describe what the engine is doing "right now".
///
/// Every run emits `Status` transitions and exactly one terminal event
/// (`RunCompleted`, `RunTerminated`, or `RunFailed`).
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A coherent log line coalesced from task output.
    Log(String),
    /// Run phase changed.
    Status(RunPhase),
    /// Task logic is blocked waiting for user input.
    InputRequested {
        /// Prompt text shown to the user (may be empty).
        prompt: String,
    },
    /// Terminal: the run completed with a result value.
    RunCompleted {
        /// Result text returned by task logic.
        result: String,
    },
    /// Terminal: the run was terminated by the user (graceful or forced).
    RunTerminated,
    /// Terminal: task logic failed after exhausting the retry policy.
    RunFailed {
        /// Raw task-failure text.
        message: String,
    },
}

/// Epoch-guarded sender handed to a run's worker context.
///
/// Forced termination bumps the controller's epoch; a sink created for an
/// older epoch silently drops its events so an abandoned worker cannot talk
/// over the next run.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
    epoch: Arc<AtomicU64>,
    run_epoch: u64,
}

impl EventSink {
    /// Create a sink bound to the given run epoch.
    pub fn new(tx: mpsc::UnboundedSender<RuntimeEvent>, epoch: Arc<AtomicU64>, run_epoch: u64) -> Self {
        Self { tx, epoch, run_epoch }
    }

    /// Returns `true` while this sink's run is still the current one.
    pub fn is_live(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.run_epoch
    }

    /// Emit an event unless this run has been superseded.
    pub fn emit(&self, event: RuntimeEvent) {
        if self.is_live() {
            let _ = self.tx.send(event);
        }
    }

    /// Emit a log line.
    pub fn log(&self, line: impl Into<String>) {
        self.emit(RuntimeEvent::Log(line.into()));
    }
}
