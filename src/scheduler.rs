//! Scheduled task firing.
//!
//! Two modes: a fixed interval in minutes, or a daily wall-clock time.
//! The timer runs as a tokio task; reconfiguring while running re-arms it
//! immediately, and the next fire time is always derivable for display.
//! Firing invokes an opaque handler; whether that attempt actually starts a
//! run is the run controller's concern (an active run rejects the overlap).

use crate::config::{ScheduleMode, ScheduleSettings};
use crate::error::{AgentError, Result};
use chrono::offset::LocalResult;
use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Smallest accepted interval.
pub const MIN_INTERVAL_MINUTES: u32 = 1;
/// Largest accepted interval (24 hours).
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

/// Called on each schedule fire.
pub type FireHandler = Box<dyn Fn() + Send + Sync>;

/// A validated schedule. Construct through [`ScheduleSpec::interval`],
/// [`ScheduleSpec::daily`] or [`ScheduleSpec::from_settings`]; invalid
/// field values never become a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSpec {
    /// Fire every `minutes` minutes.
    Interval { minutes: u32 },
    /// Fire once per day at `hour:minute` local time.
    Daily { hour: u32, minute: u32 },
}

impl ScheduleSpec {
    /// Interval schedule, 1 to 1440 minutes inclusive.
    ///
    /// # Errors
    ///
    /// [`AgentError::Schedule`] when out of range.
    pub fn interval(minutes: u32) -> Result<Self> {
        if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
            return Err(AgentError::Schedule(format!(
                "interval must be {MIN_INTERVAL_MINUTES}-{MAX_INTERVAL_MINUTES} minutes, got {minutes}"
            )));
        }
        Ok(Self::Interval { minutes })
    }

    /// Daily schedule at the given local wall-clock time.
    ///
    /// # Errors
    ///
    /// [`AgentError::Schedule`] when the time is not a valid hour/minute.
    pub fn daily(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(AgentError::Schedule(format!(
                "invalid daily time {hour:02}:{minute:02}"
            )));
        }
        Ok(Self::Daily { hour, minute })
    }

    /// Build a spec from persisted settings.
    ///
    /// # Errors
    ///
    /// [`AgentError::Schedule`] when the settings hold out-of-range values.
    pub fn from_settings(settings: &ScheduleSettings) -> Result<Self> {
        match settings.mode {
            ScheduleMode::Interval => Self::interval(settings.interval_minutes),
            ScheduleMode::SpecificTime => {
                Self::daily(u32::from(settings.hour), u32::from(settings.minute))
            }
        }
    }

    /// Next fire strictly after `now`. For interval schedules the anchor is
    /// the previous fire (or the arm time before any fire has happened).
    fn next_fire(self, now: DateTime<Local>, anchor: DateTime<Local>) -> DateTime<Local> {
        match self {
            Self::Interval { minutes } => anchor + TimeDelta::minutes(i64::from(minutes)),
            Self::Daily { hour, minute } => next_daily_fire(now, hour, minute),
        }
    }
}

/// Today at `hour:minute` if that is still ahead, otherwise tomorrow.
fn next_daily_fire(now: DateTime<Local>, hour: u32, minute: u32) -> DateTime<Local> {
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = local_at(date, hour, minute) {
            if candidate > now {
                return candidate;
            }
        }
        date = date.succ_opt().unwrap_or(date);
    }
    now
}

/// Resolve a local wall-clock time. DST folds take the earlier instant;
/// DST gaps shift one hour forward.
fn local_at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Local>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    match naive.and_local_timezone(Local) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => (naive + TimeDelta::hours(1))
            .and_local_timezone(Local)
            .earliest(),
    }
}

struct SchedulerState {
    spec: Option<ScheduleSpec>,
    armed_at: Option<DateTime<Local>>,
    last_fire: Option<DateTime<Local>>,
    cancel: Option<CancellationToken>,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    rearm: Notify,
    handler: FireHandler,
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns the schedule timer task and its configuration.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler invoking `handler` on each fire.
    pub fn new(handler: FireHandler) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    spec: None,
                    armed_at: None,
                    last_fire: None,
                    cancel: None,
                }),
                rearm: Notify::new(),
                handler,
            }),
        }
    }

    /// Install a new schedule. Takes effect immediately: a running timer
    /// re-arms against the new spec with a fresh anchor.
    pub fn configure(&self, spec: ScheduleSpec) {
        let mut state = self.inner.lock_state();
        state.spec = Some(spec);
        state.armed_at = Some(Local::now());
        state.last_fire = None;
        drop(state);
        debug!(?spec, "schedule configured");
        self.inner.rearm.notify_one();
    }

    /// Start the timer task. No-op when already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.lock_state();
        if state.cancel.is_some() {
            debug!("scheduler already running");
            return;
        }
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        state.armed_at = Some(Local::now());
        state.last_fire = None;
        drop(state);
        info!("scheduler started");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { run_timer(inner, token).await });
    }

    /// Stop the timer task. No-op when already stopped.
    pub fn stop(&self) {
        let mut state = self.inner.lock_state();
        if let Some(token) = state.cancel.take() {
            token.cancel();
            info!("scheduler stopped");
        }
    }

    /// Whether the timer task is active.
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().cancel.is_some()
    }

    /// The next instant a fire is due, or `None` when stopped or
    /// unconfigured.
    pub fn next_fire_time(&self) -> Option<DateTime<Local>> {
        let state = self.inner.lock_state();
        if state.cancel.is_none() {
            return None;
        }
        let spec = state.spec?;
        let anchor = state.last_fire.or(state.armed_at)?;
        Some(spec.next_fire(Local::now(), anchor))
    }
}

async fn run_timer(inner: Arc<SchedulerInner>, token: CancellationToken) {
    loop {
        let due = {
            let state = inner.lock_state();
            state.spec.and_then(|spec| {
                let anchor = state.last_fire.or(state.armed_at)?;
                Some(spec.next_fire(Local::now(), anchor))
            })
        };

        let Some(due) = due else {
            // Unconfigured: park until a schedule arrives or we stop.
            tokio::select! {
                () = token.cancelled() => return,
                () = inner.rearm.notified() => continue,
            }
        };

        let wait = (due - Local::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            () = token.cancelled() => return,
            () = inner.rearm.notified() => continue,
            () = tokio::time::sleep(wait) => {
                info!(due = %due.format("%Y-%m-%d %H:%M:%S"), "schedule fired");
                (inner.handler)();
                inner.lock_state().last_fire = Some(due);
            }
        }
    }
}
