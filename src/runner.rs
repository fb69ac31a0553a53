//! Run controller: drives one task execution from start to terminal state.
//!
//! A run owns a worker context (`spawn_blocking`) so the controlling context
//! stays responsive. The worker applies pre-hooks, executes task logic with
//! the configured retry policy, applies post-hooks, and emits exactly one
//! terminal event. Cancellation is cooperative: a stop flag observed by the
//! retry wait and the prompt bridge, with an epoch-guarded forced-termination
//! escape hatch after a grace period.

use crate::config::{AdvancedOptions, RunConfig};
use crate::device::DeviceControl;
use crate::error::{AgentError, Result};
use crate::output::OutputAggregator;
use crate::prompt::InputGate;
use crate::runtime::{EventSink, RunPhase, RuntimeEvent};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default grace period before a stop request escalates to forced termination.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Poll cadence while waiting for a stopping worker to wind down.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Slice width for the stop-aware retry wait.
const RETRY_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Settle delay after an auto-answer wake, before supplying the response.
const AUTO_ANSWER_SETTLE: Duration = Duration::from_secs(1);

/// Task logic executed by a run.
///
/// Implementations may write output and request input any number of times
/// through the injected [`RunIo`]; they never touch process-wide streams.
/// Well-behaved logic checks [`RunIo::stop_requested`] at step boundaries.
pub trait TaskLogic: Send + Sync {
    /// Execute the task, returning its result text.
    fn execute(&self, task: &str, config: &RunConfig, io: &RunIo) -> Result<String>;
}

impl<F> TaskLogic for F
where
    F: Fn(&str, &RunConfig, &RunIo) -> Result<String> + Send + Sync,
{
    fn execute(&self, task: &str, config: &RunConfig, io: &RunIo) -> Result<String> {
        self(task, config, io)
    }
}

/// Flags/state shared between the worker and the controlling context.
///
/// The stop flag and the provided-input slot are the only cross-context
/// writes; both are synchronized (atomic flag, mutex-guarded gate).
struct RunShared {
    stop: Arc<AtomicBool>,
    gate: InputGate,
}

impl RunShared {
    fn new() -> Arc<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        Arc::new(Self {
            stop: Arc::clone(&stop),
            gate: InputGate::new(stop),
        })
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// I/O capabilities injected into task logic: a logger handle feeding the
/// output aggregator, and an input provider backed by the prompt bridge
/// (with the auto-answer policy applied first).
pub struct RunIo {
    shared: Arc<RunShared>,
    sink: EventSink,
    out: Mutex<OutputAggregator>,
    device: Arc<dyn DeviceControl>,
    opts: AdvancedOptions,
    device_id: String,
    auto_answered: AtomicU32,
}

impl RunIo {
    fn new(
        shared: Arc<RunShared>,
        sink: EventSink,
        device: Arc<dyn DeviceControl>,
        opts: AdvancedOptions,
        device_id: String,
    ) -> Self {
        let out = Mutex::new(OutputAggregator::new(sink.clone()));
        Self {
            shared,
            sink,
            out,
            device,
            opts,
            device_id,
            auto_answered: AtomicU32::new(0),
        }
    }

    /// Accept an output fragment. Never blocks the producer.
    pub fn write(&self, fragment: &str) {
        self.lock_out().write(fragment);
    }

    /// Flush any buffered output.
    pub fn flush(&self) {
        self.lock_out().flush();
    }

    /// Returns `true` once a stop has been requested for this run.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    /// Block until user input is available for this prompt.
    ///
    /// When auto-answer applies (auto-answer, auto-wake and retry all enabled
    /// and the per-attempt budget not exhausted) the device is woken and an
    /// empty response is returned without surfacing the prompt. Otherwise the
    /// prompt is forwarded to the presentation layer and this call blocks
    /// until a response, a stop request, or the 5-minute ceiling.
    ///
    /// # Errors
    ///
    /// [`AgentError::Terminated`] on stop, [`AgentError::PromptTimeout`] on
    /// ceiling expiry.
    pub fn read_input(&self, prompt: &str) -> Result<String> {
        if !prompt.is_empty() {
            self.sink.log(prompt.to_owned());
        }

        if self.auto_answer_applies() {
            let answered = self.auto_answered.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                "auto-answering prompt ({answered}/{})",
                self.opts.max_retries
            );
            if !self.device.wake(&self.device_id) {
                warn!("auto-answer wake failed, continuing");
            }
            std::thread::sleep(AUTO_ANSWER_SETTLE);
            return Ok(String::new());
        }

        self.sink.emit(RuntimeEvent::InputRequested {
            prompt: prompt.to_owned(),
        });
        self.shared.gate.wait_for_response()
    }

    fn auto_answer_applies(&self) -> bool {
        self.opts.auto_answer
            && self.opts.auto_wake
            && self.opts.retry_enabled
            && self.auto_answered.load(Ordering::SeqCst) < self.opts.max_retries
    }

    /// Reset the auto-answer budget (called at the start of each attempt).
    fn reset_auto_answer(&self) {
        self.auto_answered.store(0, Ordering::SeqCst);
    }

    fn lock_out(&self) -> MutexGuard<'_, OutputAggregator> {
        self.out.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct ActiveRun {
    epoch: u64,
    shared: Arc<RunShared>,
    finished: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

struct ControllerInner {
    events: mpsc::UnboundedSender<RuntimeEvent>,
    device: Arc<dyn DeviceControl>,
    logic: Arc<dyn TaskLogic>,
    epoch: Arc<AtomicU64>,
    active: Mutex<Option<ActiveRun>>,
    phase: Mutex<RunPhase>,
}

impl ControllerInner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, sink: &EventSink, phase: RunPhase) {
        if sink.is_live() {
            *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
        }
        sink.emit(RuntimeEvent::Status(phase));
    }
}

/// Owns one task execution at a time and its lifecycle.
///
/// Start requests while a run is active are rejected with
/// [`AgentError::RunInProgress`] — this is also the guard that keeps
/// scheduled fires from overlapping an active run.
pub struct RunController {
    inner: Arc<ControllerInner>,
}

impl RunController {
    /// Create a controller emitting events on the given channel.
    pub fn new(
        events: mpsc::UnboundedSender<RuntimeEvent>,
        device: Arc<dyn DeviceControl>,
        logic: Arc<dyn TaskLogic>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                events,
                device,
                logic,
                epoch: Arc::new(AtomicU64::new(0)),
                active: Mutex::new(None),
                phase: Mutex::new(RunPhase::Idle),
            }),
        }
    }

    /// Start a run. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`AgentError::RunInProgress`] when a run is already active.
    pub fn start(
        &self,
        task: impl Into<String>,
        config: RunConfig,
        opts: AdvancedOptions,
    ) -> Result<()> {
        let task = task.into();
        let mut active = self.inner.lock_active();
        if let Some(run) = active.as_ref() {
            if !run.finished.load(Ordering::SeqCst) {
                return Err(AgentError::RunInProgress);
            }
        }

        let run_epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = RunShared::new();
        let finished = Arc::new(AtomicBool::new(false));
        let sink = EventSink::new(
            self.inner.events.clone(),
            Arc::clone(&self.inner.epoch),
            run_epoch,
        );

        let inner = Arc::clone(&self.inner);
        let worker_shared = Arc::clone(&shared);
        let worker_finished = Arc::clone(&finished);
        let handle = tokio::task::spawn_blocking(move || {
            run_worker(&inner, run_epoch, worker_shared, sink, task, config, opts);
            worker_finished.store(true, Ordering::SeqCst);
        });

        *active = Some(ActiveRun {
            epoch: run_epoch,
            shared,
            finished,
            handle,
        });
        Ok(())
    }

    /// Request a cooperative stop of the active run (no-op when idle).
    pub fn stop(&self) {
        if let Some(run) = self.inner.lock_active().as_ref() {
            if !run.finished.load(Ordering::SeqCst) {
                info!("stop requested");
                run.shared.stop.store(true, Ordering::SeqCst);
                run.shared.gate.notify_stop();
            }
        }
    }

    /// Request a stop and, if the worker has not wound down within `grace`,
    /// force-terminate the run.
    ///
    /// Forced termination abandons the worker: its epoch is superseded so any
    /// late events are dropped, and the controller is freed for new runs. It
    /// is reported distinctly in logs but surfaces as a normal termination.
    pub async fn stop_with_grace(&self, grace: Duration) {
        self.stop();
        let deadline = Instant::now() + grace;
        while self.is_running() {
            if Instant::now() >= deadline {
                self.force_terminate();
                return;
            }
            tokio::time::sleep(STOP_POLL).await;
        }
    }

    fn force_terminate(&self) {
        let mut active = self.inner.lock_active();
        let Some(run) = active.take() else { return };
        if run.finished.load(Ordering::SeqCst) {
            return;
        }
        // Supersede the run's epoch: the abandoned worker's sink goes stale.
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        run.handle.abort();
        warn!("forced termination: run did not stop within the grace period");
        *self.inner.phase.lock().unwrap_or_else(|e| e.into_inner()) = RunPhase::Terminated;
        let _ = self
            .inner
            .events
            .send(RuntimeEvent::Status(RunPhase::Terminated));
        let _ = self.inner.events.send(RuntimeEvent::RunTerminated);
    }

    /// Deliver a user response to a pending prompt.
    ///
    /// Returns `true` if a waiter was pending and will receive it.
    pub fn provide_input(&self, response: impl Into<String>) -> bool {
        match self.inner.lock_active().as_ref() {
            Some(run) if !run.finished.load(Ordering::SeqCst) => {
                run.shared.gate.provide(response)
            }
            _ => false,
        }
    }

    /// Returns `true` while task logic is blocked waiting for input.
    pub fn is_waiting_for_input(&self) -> bool {
        self.inner
            .lock_active()
            .as_ref()
            .is_some_and(|run| run.shared.gate.is_waiting())
    }

    /// Returns `true` while a run is active.
    pub fn is_running(&self) -> bool {
        self.inner
            .lock_active()
            .as_ref()
            .is_some_and(|run| !run.finished.load(Ordering::SeqCst))
    }

    /// Current run phase (last status of the most recent run).
    pub fn phase(&self) -> RunPhase {
        *self.inner.phase.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Worker body: pre-hooks → retry loop → post-hooks → terminal emission.
fn run_worker(
    inner: &Arc<ControllerInner>,
    run_epoch: u64,
    shared: Arc<RunShared>,
    sink: EventSink,
    task: String,
    config: RunConfig,
    opts: AdvancedOptions,
) {
    let io = RunIo::new(
        Arc::clone(&shared),
        sink.clone(),
        Arc::clone(&inner.device),
        opts.clone(),
        config.device_id.clone(),
    );

    inner.set_phase(&sink, RunPhase::Preparing);
    sink.log(format!("Starting task: {task}\n"));
    sink.log(format!("{}\n", "=".repeat(50)));

    run_hook(&sink, opts.auto_kill_app, "kill app", || {
        inner.device.kill_app(&opts.app_package, &config.device_id)
    });
    run_hook(&sink, opts.auto_wake, "wake device", || {
        inner.device.wake(&config.device_id)
    });

    let outcome = if shared.stop_requested() {
        Err(AgentError::Terminated)
    } else {
        inner.set_phase(&sink, RunPhase::Running);
        execute_with_retry(inner, &shared, &sink, &io, &task, &config, &opts)
    };

    io.flush();

    let stopped = shared.stop_requested() || matches!(outcome, Err(AgentError::Terminated));

    // A stop means no further device hooks are issued.
    if !stopped {
        run_hook(&sink, opts.auto_kill_app, "kill app", || {
            inner.device.kill_app(&opts.app_package, &config.device_id)
        });
        run_hook(&sink, opts.auto_lock, "lock device", || {
            inner.device.lock(&config.device_id)
        });
    }

    sink.log(format!("{}\n", "=".repeat(50)));
    match outcome {
        _ if stopped => {
            info!("run terminated by user");
            inner.set_phase(&sink, RunPhase::Terminated);
            sink.emit(RuntimeEvent::RunTerminated);
        }
        Ok(result) => {
            inner.set_phase(&sink, RunPhase::Completed);
            sink.emit(RuntimeEvent::RunCompleted { result });
        }
        Err(e) => {
            let message = failure_text(e);
            inner.set_phase(&sink, RunPhase::Errored);
            sink.emit(RuntimeEvent::RunFailed { message });
        }
    }

    // Free the controller, unless a forced termination already superseded us.
    let mut active = inner.lock_active();
    if active.as_ref().is_some_and(|run| run.epoch == run_epoch) {
        *active = None;
    }
}

fn execute_with_retry(
    inner: &Arc<ControllerInner>,
    shared: &RunShared,
    sink: &EventSink,
    io: &RunIo,
    task: &str,
    config: &RunConfig,
    opts: &AdvancedOptions,
) -> Result<String> {
    let mut attempt: u32 = 0;
    loop {
        io.reset_auto_answer();
        match inner.logic.execute(task, config, io) {
            Ok(result) => return Ok(result),
            Err(e) => {
                if shared.stop_requested() || matches!(e, AgentError::Terminated) {
                    return Err(AgentError::Terminated);
                }
                if opts.retry_enabled && attempt < opts.max_retries {
                    attempt += 1;
                    warn!("task attempt {attempt} failed: {e}");
                    sink.log(format!(
                        "Task failed: {e}\nRetrying in {}s (attempt {attempt}/{})\n",
                        opts.retry_interval_secs, opts.max_retries
                    ));
                    if !wait_interruptible(
                        &shared.stop,
                        Duration::from_secs(opts.retry_interval_secs),
                    ) {
                        return Err(AgentError::Terminated);
                    }
                    continue;
                }
                return Err(e);
            }
        }
    }
}

/// Run a best-effort device hook: failures are logged, never fatal.
fn run_hook(sink: &EventSink, enabled: bool, label: &str, hook: impl FnOnce() -> bool) {
    if !enabled {
        return;
    }
    debug!("device hook: {label}");
    if !hook() {
        warn!("device hook failed: {label}");
        sink.log(format!("Warning: {label} failed, continuing\n"));
    }
}

/// Sleep in stop-aware slices. Returns `false` when interrupted by a stop.
fn wait_interruptible(stop: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(RETRY_WAIT_SLICE.min(deadline - now));
    }
}

/// Terminal error text surfaced to the presentation layer: raw task-failure
/// text for task errors, the canonical message otherwise.
fn failure_text(e: AgentError) -> String {
    match e {
        AgentError::Task(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Default)]
    struct RecordingDevice {
        wakes: AtomicUsize,
        locks: AtomicUsize,
        kills: AtomicUsize,
        fail: bool,
    }

    impl DeviceControl for RecordingDevice {
        fn wake(&self, _device_id: &str) -> bool {
            self.wakes.fetch_add(1, Ordering::SeqCst);
            !self.fail
        }
        fn lock(&self, _device_id: &str) -> bool {
            self.locks.fetch_add(1, Ordering::SeqCst);
            !self.fail
        }
        fn kill_app(&self, _package: &str, _device_id: &str) -> bool {
            self.kills.fetch_add(1, Ordering::SeqCst);
            !self.fail
        }
    }

    fn test_config() -> RunConfig {
        crate::config::AppConfig::default().run_config()
    }

    fn make_controller(
        device: Arc<RecordingDevice>,
        logic: impl TaskLogic + 'static,
    ) -> (RunController, UnboundedReceiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = RunController::new(tx, device, Arc::new(logic));
        (controller, rx)
    }

    /// Drain events until a terminal event arrives (or the timeout hits).
    async fn collect_until_terminal(rx: &mut UnboundedReceiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("timed out waiting for terminal event")
                .expect("event channel closed");
            let terminal = matches!(
                event,
                RuntimeEvent::RunCompleted { .. }
                    | RuntimeEvent::RunTerminated
                    | RuntimeEvent::RunFailed { .. }
            );
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    /// The worker clears its active slot just after the terminal event, so
    /// give it a moment to wind down before asserting on controller state.
    async fn wait_idle(controller: &RunController) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while controller.is_running() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "run did not wind down"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn statuses(events: &[RuntimeEvent]) -> Vec<RunPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::Status(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn successful_run_walks_the_state_machine() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, mut rx) = make_controller(Arc::clone(&device), |_: &str,
                                                                          _: &RunConfig,
                                                                          io: &RunIo| {
            io.write("working...\n");
            Ok("all done".to_owned())
        });

        controller
            .start("demo task", test_config(), AdvancedOptions::default())
            .unwrap();
        let events = collect_until_terminal(&mut rx).await;

        assert_eq!(
            statuses(&events),
            vec![RunPhase::Preparing, RunPhase::Running, RunPhase::Completed]
        );
        match events.last().unwrap() {
            RuntimeEvent::RunCompleted { result } => assert_eq!(result, "all done"),
            other => panic!("expected RunCompleted, got {other:?}"),
        }
        wait_idle(&controller).await;
        assert_eq!(controller.phase(), RunPhase::Completed);
    }

    #[tokio::test]
    async fn start_rejected_while_run_active() {
        let device = Arc::new(RecordingDevice::default());
        let gate = Arc::new(AtomicBool::new(false));
        let release = Arc::clone(&gate);
        let (controller, mut rx) =
            make_controller(device, move |_: &str, _: &RunConfig, _: &RunIo| {
                while !release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Ok(String::new())
            });

        controller
            .start("first", test_config(), AdvancedOptions::default())
            .unwrap();
        let second = controller.start("second", test_config(), AdvancedOptions::default());
        assert!(matches!(second, Err(AgentError::RunInProgress)));

        gate.store(true, Ordering::SeqCst);
        let _ = collect_until_terminal(&mut rx).await;
        wait_idle(&controller).await;

        // Freed for a new run once the previous one finished.
        controller
            .start("third", test_config(), AdvancedOptions::default())
            .unwrap();
        let _ = collect_until_terminal(&mut rx).await;
    }

    #[tokio::test]
    async fn retry_absorbs_failures_until_success() {
        let device = Arc::new(RecordingDevice::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (controller, mut rx) =
            make_controller(device, move |_: &str, _: &RunConfig, _: &RunIo| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(AgentError::Task(format!("boom {n}")))
                } else {
                    Ok("finally".to_owned())
                }
            });

        let opts = AdvancedOptions {
            retry_enabled: true,
            max_retries: 3,
            retry_interval_secs: 0,
            ..AdvancedOptions::default()
        };
        controller.start("retry task", test_config(), opts).unwrap();
        let events = collect_until_terminal(&mut rx).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(matches!(
            events.last().unwrap(),
            RuntimeEvent::RunCompleted { .. }
        ));
        let retry_logs = events
            .iter()
            .filter(|e| matches!(e, RuntimeEvent::Log(l) if l.contains("Retrying")))
            .count();
        assert_eq!(retry_logs, 3);
    }

    #[tokio::test]
    async fn retry_disabled_fails_immediately_with_raw_message() {
        let device = Arc::new(RecordingDevice::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (controller, mut rx) =
            make_controller(device, move |_: &str, _: &RunConfig, _: &RunIo| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Task("element not found".to_owned()))
            });

        controller
            .start("fragile", test_config(), AdvancedOptions::default())
            .unwrap();
        let events = collect_until_terminal(&mut rx).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(controller.phase(), RunPhase::Errored);
        match events.last().unwrap() {
            RuntimeEvent::RunFailed { message } => assert_eq!(message, "element not found"),
            other => panic!("expected RunFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_mid_run_terminates_and_skips_post_hooks() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, mut rx) = make_controller(Arc::clone(&device), |_: &str,
                                                                          _: &RunConfig,
                                                                          io: &RunIo| {
            while !io.stop_requested() {
                std::thread::sleep(Duration::from_millis(10));
            }
            // Even a success result is overridden by the stop.
            Ok("too late".to_owned())
        });

        let opts = AdvancedOptions {
            auto_lock: true,
            retry_enabled: true,
            max_retries: 3,
            retry_interval_secs: 30,
            ..AdvancedOptions::default()
        };
        controller.start("stoppable", test_config(), opts).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.stop();
        let events = collect_until_terminal(&mut rx).await;

        assert!(matches!(events.last().unwrap(), RuntimeEvent::RunTerminated));
        assert_eq!(controller.phase(), RunPhase::Terminated);
        assert_eq!(device.locks.load(Ordering::SeqCst), 0, "post-hooks skipped");
    }

    #[tokio::test]
    async fn stop_during_retry_wait_suppresses_further_attempts() {
        let device = Arc::new(RecordingDevice::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (controller, mut rx) =
            make_controller(device, move |_: &str, _: &RunConfig, _: &RunIo| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Task("flaky".to_owned()))
            });

        let opts = AdvancedOptions {
            retry_enabled: true,
            max_retries: 5,
            retry_interval_secs: 30,
            ..AdvancedOptions::default()
        };
        controller.start("slow retry", test_config(), opts).unwrap();

        // Let the first attempt fail and enter the retry wait, then stop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.stop();
        let events = collect_until_terminal(&mut rx).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(events.last().unwrap(), RuntimeEvent::RunTerminated));
    }

    #[tokio::test]
    async fn auto_answer_bounded_by_retry_budget() {
        let device = Arc::new(RecordingDevice::default());
        let responses = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&responses);
        let (controller, mut rx) = make_controller(Arc::clone(&device), move |_: &str,
                                                                               _: &RunConfig,
                                                                               io: &RunIo| {
            for _ in 0..3 {
                let response = io.read_input("Press Enter to continue")?;
                seen.lock().unwrap().push(response);
            }
            Ok("done".to_owned())
        });

        let opts = AdvancedOptions {
            auto_wake: true,
            retry_enabled: true,
            max_retries: 2,
            retry_interval_secs: 0,
            auto_answer: true,
            ..AdvancedOptions::default()
        };
        controller.start("prompting task", test_config(), opts).unwrap();

        // The first two prompts are auto-answered; the third surfaces.
        let mut surfaced = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !surfaced {
            let event = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("timed out waiting for surfaced prompt")
                .expect("event channel closed");
            if let RuntimeEvent::InputRequested { prompt } = event {
                assert_eq!(prompt, "Press Enter to continue");
                surfaced = true;
            }
        }
        assert!(controller.provide_input("manual answer"));
        let events = collect_until_terminal(&mut rx).await;
        assert!(matches!(
            events.last().unwrap(),
            RuntimeEvent::RunCompleted { .. }
        ));

        let seen = responses.lock().unwrap();
        assert_eq!(seen.as_slice(), ["", "", "manual answer"]);
        // One pre-hook wake (auto_wake) plus one wake per auto-answer.
        assert_eq!(device.wakes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hook_failures_are_not_fatal() {
        let device = Arc::new(RecordingDevice {
            fail: true,
            ..RecordingDevice::default()
        });
        let (controller, mut rx) = make_controller(Arc::clone(&device), |_: &str,
                                                                          _: &RunConfig,
                                                                          _: &RunIo| {
            Ok("ok".to_owned())
        });

        let opts = AdvancedOptions {
            auto_wake: true,
            auto_lock: true,
            auto_kill_app: true,
            app_package: "com.example.app".to_owned(),
            ..AdvancedOptions::default()
        };
        controller.start("hooked", test_config(), opts).unwrap();
        let events = collect_until_terminal(&mut rx).await;

        assert!(matches!(
            events.last().unwrap(),
            RuntimeEvent::RunCompleted { .. }
        ));
        // Pre kill + post kill, pre wake, post lock — all attempted.
        assert_eq!(device.kills.load(Ordering::SeqCst), 2);
        assert_eq!(device.wakes.load(Ordering::SeqCst), 1);
        assert_eq!(device.locks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_before_logic_starts_terminates_without_running() {
        let device = Arc::new(RecordingDevice::default());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_flag = Arc::clone(&ran);
        let (controller, mut rx) =
            make_controller(device, move |_: &str, _: &RunConfig, _: &RunIo| {
                ran_flag.store(true, Ordering::SeqCst);
                Ok(String::new())
            });

        controller
            .start("never runs", test_config(), AdvancedOptions::default())
            .unwrap();
        // Race: stop immediately; either the logic never starts or the stop
        // lands during it — both must end in Terminated.
        controller.stop();
        let events = collect_until_terminal(&mut rx).await;
        let last = events.last().unwrap();
        assert!(
            matches!(last, RuntimeEvent::RunTerminated)
                || (ran.load(Ordering::SeqCst)
                    && matches!(last, RuntimeEvent::RunCompleted { .. })),
            "unexpected terminal: {last:?}"
        );
    }

    #[tokio::test]
    async fn forced_termination_drops_zombie_events_and_frees_controller() {
        let device = Arc::new(RecordingDevice::default());
        let (controller, mut rx) = make_controller(device, |_: &str, _: &RunConfig, _: &RunIo| {
            // Ignores the stop flag entirely.
            std::thread::sleep(Duration::from_millis(1500));
            Ok("zombie result".to_owned())
        });

        controller
            .start("stuck", test_config(), AdvancedOptions::default())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.stop_with_grace(Duration::from_millis(100)).await;

        assert!(!controller.is_running());
        assert_eq!(controller.phase(), RunPhase::Terminated);
        let events = collect_until_terminal(&mut rx).await;
        assert!(matches!(events.last().unwrap(), RuntimeEvent::RunTerminated));

        // The abandoned worker finishes later; its events must be dropped.
        tokio::time::sleep(Duration::from_millis(1600)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, RuntimeEvent::RunCompleted { .. }),
                "zombie event leaked: {event:?}"
            );
        }

        // And the controller accepts a new run immediately after the force.
        controller
            .start("fresh", test_config(), AdvancedOptions::default())
            .unwrap();
    }
}
