//! Per-script execution unit
//!
//! A unit either owns a dedicated worker thread, disciplined into a
//! cooperative model by two counting semaphores, or runs inline on the
//! domain thread. With a worker, the domain releases `continue_signal` and
//! blocks on `wait_signal`; the worker does the opposite whenever it yields.
//! Which semaphore each side is blocked on is the only record of whether a
//! running unit is idle or holds the turn.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use turnstile_events::{DiagnosticLevel, FaultPhase, KeyboardEvent, ScriptEvent};

use crate::context::ScriptContext;
use crate::domain::DomainInner;
use crate::error::{BridgeError, HostError, panic_message};
use crate::semaphore::Semaphore;
use crate::sink::{DiagnosticSink, ScriptIdentity};
use crate::stopwatch::Stopwatch;
use crate::Script;

/// Stable identifier of a unit within its domain
pub type UnitId = u64;

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Created,
    Running,
    Paused,
    Aborted,
}

/// Unwind payload used to cancel a worker at its next scheduler boundary
pub(crate) struct AbortSignal;

thread_local! {
    static CURRENT_UNIT: RefCell<Option<Arc<ScriptUnit>>> = const { RefCell::new(None) };
}

/// The unit whose worker thread is the calling thread, if any
pub(crate) fn current_unit() -> Option<Arc<ScriptUnit>> {
    CURRENT_UNIT.with(|current| current.borrow().clone())
}

/// Scheduling settings resolved when a unit is created
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitSettings {
    pub dedicated_thread: bool,
    pub interval: Duration,
    pub reset_timeout_on_native_call: bool,
}

struct Handoff {
    continue_signal: Semaphore,
    wait_signal: Semaphore,
}

/// One independently scheduled script instance
pub struct ScriptUnit {
    id: UnitId,
    identity: ScriptIdentity,
    script: Mutex<Option<Box<dyn Script>>>,
    started: AtomicBool,
    running: AtomicBool,
    paused: AtomicBool,
    aborted: AtomicBool,
    executing: AtomicBool,
    start_hook_done: AtomicBool,
    abort_hook_done: AtomicBool,
    handoff: OnceLock<Arc<Handoff>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    input: Mutex<VecDeque<KeyboardEvent>>,
    stopwatch: Stopwatch,
    dedicated_thread: bool,
    reset_timeout_on_native_call: bool,
    interval_ms: AtomicU64,
    next_inline_tick: Mutex<Option<Instant>>,
    sink: Arc<dyn DiagnosticSink>,
}

impl ScriptUnit {
    pub(crate) fn new(
        id: UnitId,
        identity: ScriptIdentity,
        script: Box<dyn Script>,
        settings: UnitSettings,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            id,
            identity,
            script: Mutex::new(Some(script)),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            start_hook_done: AtomicBool::new(false),
            abort_hook_done: AtomicBool::new(false),
            handoff: OnceLock::new(),
            thread: Mutex::new(None),
            input: Mutex::new(VecDeque::new()),
            stopwatch: Stopwatch::new(),
            dedicated_thread: settings.dedicated_thread,
            reset_timeout_on_native_call: settings.reset_timeout_on_native_call,
            interval_ms: AtomicU64::new(settings.interval.as_millis() as u64),
            next_inline_tick: Mutex::new(None),
            sink,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn file(&self) -> Option<&Path> {
        self.identity.file.as_deref()
    }

    pub fn identity(&self) -> &ScriptIdentity {
        &self.identity
    }

    pub fn state(&self) -> UnitState {
        if self.is_aborted() {
            UnitState::Aborted
        } else if !self.started.load(Ordering::SeqCst) {
            UnitState::Created
        } else if self.is_paused() {
            UnitState::Paused
        } else {
            UnitState::Running
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// True while this unit holds the domain's turn
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn has_dedicated_thread(&self) -> bool {
        self.handoff.get().is_some()
    }

    pub fn resets_timeout_on_native_call(&self) -> bool {
        self.reset_timeout_on_native_call
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Whether an inline unit's interval has elapsed since its last tick
    pub(crate) fn is_due(&self) -> bool {
        self.has_dedicated_thread()
            || self
                .next_inline_tick
                .lock()
                .is_none_or(|at| Instant::now() >= at)
    }

    /// Events queued for the next tick, not yet delivered
    pub fn pending_input(&self) -> usize {
        self.input.lock().len()
    }

    pub(crate) fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }

    pub(crate) fn set_executing(&self, executing: bool) {
        self.executing.store(executing, Ordering::SeqCst);
    }

    pub(crate) fn push_input(&self, event: KeyboardEvent) {
        self.input.lock().push_back(event);
    }

    pub(crate) fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    pub(crate) fn report(&self, event: ScriptEvent) {
        self.sink.script_event(&self.identity, &event);
    }

    /// Begin running, either on a new worker thread or inline
    pub(crate) fn start(self: &Arc<Self>, domain: Weak<DomainInner>) -> Result<(), HostError> {
        if self.is_aborted() {
            return Err(HostError::Aborted(self.identity.name.clone()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyStarted(self.identity.name.clone()));
        }

        if self.dedicated_thread {
            let handoff = Arc::new(Handoff {
                continue_signal: Semaphore::new(0),
                wait_signal: Semaphore::new(0),
            });
            // `start` is guarded by `started`, so the cell is always empty here
            let _ = self.handoff.set(handoff.clone());
            self.running.store(true, Ordering::SeqCst);

            let unit = self.clone();
            let spawned = thread::Builder::new()
                .name(format!("script:{}", self.identity.name))
                .spawn(move || worker_main(unit, handoff, domain));

            match spawned {
                Ok(handle) => *self.thread.lock() = Some(handle),
                Err(source) => {
                    self.running.store(false, Ordering::SeqCst);
                    self.aborted.store(true, Ordering::SeqCst);
                    return Err(HostError::Spawn {
                        name: self.identity.name.clone(),
                        source,
                    });
                }
            }
        } else {
            self.running.store(true, Ordering::SeqCst);
        }

        self.report(ScriptEvent::Started {
            dedicated_thread: self.dedicated_thread,
        });
        Ok(())
    }

    /// Stop giving this unit turns until [`resume`](Self::resume)
    pub fn pause(&self) {
        if !self.is_aborted() && !self.paused.swap(true, Ordering::SeqCst) {
            self.report(ScriptEvent::Paused);
        }
    }

    pub fn resume(&self) {
        if !self.is_aborted() && self.paused.swap(false, Ordering::SeqCst) {
            self.report(ScriptEvent::Resumed);
        }
    }

    /// Terminate the unit. Idempotent and final.
    ///
    /// A worker parked at a scheduler boundary is woken and unwinds. A worker
    /// that holds the turn keeps it until its next boundary, where it unwinds
    /// and hands the turn back on exit; until then the domain keeps waiting
    /// under the watchdog. A worker stuck inside a blocking call keeps running
    /// until the call returns and is refused at its next boundary.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.report(ScriptEvent::Aborted);

        if let Some(handoff) = self.handoff.get() {
            // Only the worker itself hands the turn back (see `worker_main`)
            handoff.continue_signal.release();
            // Detach: joining could block forever on a stuck script
            drop(self.thread.lock().take());
        }

        self.input.lock().clear();
        self.run_abort_hook();
    }

    /// Sleep from the script's point of view.
    ///
    /// On the unit's own worker this yields the turn back to the domain until
    /// `duration` has passed, always yielding at least once. Anywhere else it
    /// is a plain thread sleep.
    pub fn wait(&self, duration: Duration) {
        match self.handoff.get() {
            Some(handoff) if self.is_current_worker() => {
                let resume_at = Instant::now() + duration;
                loop {
                    self.unwind_if_aborted();
                    handoff.wait_signal.release();
                    handoff.continue_signal.acquire();
                    self.unwind_if_aborted();
                    if Instant::now() >= resume_at {
                        break;
                    }
                }
            }
            _ => thread::sleep(duration),
        }
    }

    /// Hand the turn back so the domain drains a task just queued by this worker
    pub(crate) fn yield_for_task(&self) {
        if let Some(handoff) = self.handoff.get() {
            self.unwind_if_aborted();
            handoff.wait_signal.release();
            handoff.continue_signal.acquire();
            self.unwind_if_aborted();
        }
    }

    /// Grant the turn to the worker (domain side of the hand-off)
    pub(crate) fn signal_continue(&self) {
        if let Some(handoff) = self.handoff.get() {
            handoff.continue_signal.release();
        }
    }

    /// Wait up to `timeout` for the worker to yield (domain side of the hand-off)
    pub(crate) fn wait_for_yield(&self, timeout: Duration) -> bool {
        match self.handoff.get() {
            Some(handoff) => handoff.wait_signal.acquire_timeout(timeout),
            None => true,
        }
    }

    /// Refuse further boundary crossings by an aborted unit
    pub(crate) fn ensure_live(&self) -> Result<(), BridgeError> {
        if self.is_aborted() {
            self.unwind_if_aborted();
            return Err(BridgeError::NotExecuting(self.identity.name.clone()));
        }
        Ok(())
    }

    fn is_current_worker(&self) -> bool {
        self.has_dedicated_thread()
            && CURRENT_UNIT.with(|current| {
                current
                    .borrow()
                    .as_ref()
                    .is_some_and(|unit| std::ptr::eq(unit.as_ref(), self))
            })
    }

    fn unwind_if_aborted(&self) {
        if self.is_aborted() && self.is_current_worker() {
            panic::resume_unwind(Box::new(AbortSignal));
        }
    }

    /// Run the script's abort hook once, if the script is not busy elsewhere.
    ///
    /// Whichever side next owns the script after cancellation (abort caller,
    /// exiting worker, or the domain after an inline tick) gets to run it.
    pub(crate) fn run_abort_hook(&self) {
        if !self.is_aborted() || self.abort_hook_done.load(Ordering::SeqCst) {
            return;
        }
        let Some(mut guard) = self.script.try_lock() else {
            return;
        };
        if self.abort_hook_done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut script) = guard.take() {
            drop(guard);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| script.on_abort()));
            if let Err(payload) = outcome {
                self.sink.log(
                    DiagnosticLevel::Warning,
                    &format!(
                        "{}: abort handler panicked: {}",
                        self.identity,
                        panic_message(payload.as_ref())
                    ),
                );
            }
        }
    }

    /// One tick of script logic: start hook on first run, queued key events,
    /// then the tick callback
    pub(crate) fn do_tick(self: &Arc<Self>, domain: &Weak<DomainInner>) {
        let mut guard = self.script.lock();
        let Some(script) = guard.as_mut() else {
            return;
        };
        let mut ctx = ScriptContext::new(self.clone(), domain.clone());
        if !self.has_dedicated_thread() {
            *self.next_inline_tick.lock() = Some(Instant::now() + self.interval());
        }

        if !self.start_hook_done.swap(true, Ordering::SeqCst) {
            if let Err(message) = guarded(|| script.on_start(&mut ctx)) {
                drop(guard);
                self.fatal_fault(FaultPhase::Start, message);
                return;
            }
        }

        let events: Vec<KeyboardEvent> = self.input.lock().drain(..).collect();
        for event in &events {
            trace!(target: "scripting", "{} <- {:?}", self.identity.name, event);
            if let Err(message) = guarded(|| script.on_key(event, &mut ctx)) {
                self.report(ScriptEvent::Fault {
                    during: FaultPhase::KeyEvent,
                    message,
                });
            }
            if !self.is_running() {
                return;
            }
        }

        if let Err(message) = guarded(|| script.on_tick(&mut ctx)) {
            drop(guard);
            self.fatal_fault(FaultPhase::Tick, message);
        }
    }

    fn fatal_fault(&self, during: FaultPhase, message: String) {
        self.report(ScriptEvent::Fault { during, message });
        self.abort();
    }
}

impl std::fmt::Debug for ScriptUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptUnit")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("dedicated_thread", &self.has_dedicated_thread())
            .finish()
    }
}

/// Run a script callback, turning errors and panics into a message.
/// Cancellation unwinds straight through.
fn guarded(f: impl FnOnce() -> anyhow::Result<()>) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{:#}", err)),
        Err(payload) => {
            if payload.is::<AbortSignal>() {
                panic::resume_unwind(payload);
            }
            Err(panic_message(payload.as_ref()))
        }
    }
}

fn worker_main(unit: Arc<ScriptUnit>, handoff: Arc<Handoff>, domain: Weak<DomainInner>) {
    CURRENT_UNIT.with(|current| *current.borrow_mut() = Some(unit.clone()));
    debug!(target: "scripting", "Worker for {} started", unit.identity);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        handoff.continue_signal.acquire();
        unit.unwind_if_aborted();

        while unit.is_running() {
            if domain.strong_count() == 0 {
                break;
            }
            unit.do_tick(&domain);
            if !unit.is_running() {
                break;
            }
            unit.wait(unit.interval());
        }
    }));

    if let Err(payload) = outcome {
        if !payload.is::<AbortSignal>() {
            unit.sink.log(
                DiagnosticLevel::Error,
                &format!(
                    "{}: worker terminated unexpectedly: {}",
                    unit.identity,
                    panic_message(payload.as_ref())
                ),
            );
            unit.abort();
        }
    }

    CURRENT_UNIT.with(|current| current.borrow_mut().take());
    unit.run_abort_hook();
    debug!(target: "scripting", "Worker for {} exited", unit.identity);
    // Hand the turn back one last time in case the domain is waiting on us
    handoff.wait_signal.release();
}
