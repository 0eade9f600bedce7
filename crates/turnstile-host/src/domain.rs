//! The scheduler that owns every script unit and drives the global tick
//!
//! The host calls [`Domain::tick`] once per frame from its privileged thread.
//! Each running unit gets one turn per tick, in registration order. While a
//! worker holds the turn the domain thread is parked on the unit's wait
//! semaphore, waking in short slices to enforce the timeout budget and to run
//! any task the worker hands over.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, trace, warn};
use turnstile_events::{
    DiagnosticLevel, FaultPhase, InputReceiver, InputSender, KeyCode, KeyEventKind, KeyboardEvent,
    ScriptEvent, input_channel,
};

use crate::config::{SchedulerConfig, ScriptConfig};
use crate::debugger::{self, DebuggerProbe};
use crate::error::{BridgeError, HostError, panic_message};
use crate::native::{ContextSwapGuard, HostBindings};
use crate::pinned::{PinnedStr, PinnedStrings};
use crate::registry::{ScriptCatalog, ScriptDescriptor, ScriptLoader};
use crate::sink::{DiagnosticSink, ScriptIdentity, TracingSink};
use crate::stopwatch::Stopwatch;
use crate::task::{Task, TaskQueue};
use crate::unit::{AbortSignal, ScriptUnit, UnitId, UnitSettings, UnitState, current_unit};
use crate::{Script, ScriptOptions};

/// Snapshot of one registered unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    pub id: UnitId,
    pub name: String,
    pub file: Option<PathBuf>,
    pub state: UnitState,
}

#[derive(Debug, Default)]
struct TurnState {
    executing: Option<Arc<ScriptUnit>>,
    scheduler_thread: Option<ThreadId>,
    in_tick: bool,
    tick_count: u64,
}

pub(crate) struct DomainInner {
    config: SchedulerConfig,
    registry: RwLock<Vec<Arc<ScriptUnit>>>,
    turn: Mutex<TurnState>,
    tasks: TaskQueue,
    bindings: RwLock<Option<HostBindings>>,
    input_tx: InputSender,
    input_rx: Mutex<InputReceiver>,
    pressed_keys: RwLock<HashSet<KeyCode>>,
    pinned: PinnedStrings,
    catalog: RwLock<ScriptCatalog>,
    loader: Option<Arc<dyn ScriptLoader>>,
    overrides: BTreeMap<String, ScriptConfig>,
    sink: Arc<dyn DiagnosticSink>,
    debugger_probe: DebuggerProbe,
    next_unit_id: AtomicU64,
}

impl Drop for DomainInner {
    fn drop(&mut self) {
        let units = std::mem::take(self.registry.get_mut());
        if !units.is_empty() {
            debug!(target: "scripting", "Domain dropped, aborting {} script(s)", units.len());
        }
        for unit in units {
            unit.abort();
        }
    }
}

/// Builder for [`Domain`]
pub struct DomainBuilder {
    config: SchedulerConfig,
    sink: Arc<dyn DiagnosticSink>,
    debugger_probe: DebuggerProbe,
    bindings: Option<HostBindings>,
    catalog: ScriptCatalog,
    loader: Option<Arc<dyn ScriptLoader>>,
    overrides: BTreeMap<String, ScriptConfig>,
}

impl DomainBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            sink: Arc::new(TracingSink),
            debugger_probe: debugger::is_attached,
            bindings: None,
            catalog: ScriptCatalog::new(),
            loader: None,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_debugger_probe(mut self, probe: DebuggerProbe) -> Self {
        self.debugger_probe = probe;
        self
    }

    pub fn with_host_bindings(mut self, bindings: HostBindings) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn with_catalog(mut self, catalog: ScriptCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Loader used by [`Domain::register_file`]. Defaults to the catalog.
    pub fn with_loader(mut self, loader: Arc<dyn ScriptLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Per-script settings keyed by script name
    pub fn with_script_overrides(mut self, overrides: BTreeMap<String, ScriptConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Build the domain. The calling thread becomes the scheduler thread until
    /// the first [`Domain::tick`] says otherwise.
    pub fn build(self) -> Domain {
        let (input_tx, input_rx) = input_channel();
        let turn = TurnState {
            scheduler_thread: Some(thread::current().id()),
            ..TurnState::default()
        };

        Domain {
            inner: Arc::new(DomainInner {
                config: self.config,
                registry: RwLock::new(Vec::new()),
                turn: Mutex::new(turn),
                tasks: TaskQueue::default(),
                bindings: RwLock::new(self.bindings),
                input_tx,
                input_rx: Mutex::new(input_rx),
                pressed_keys: RwLock::new(HashSet::new()),
                pinned: PinnedStrings::default(),
                catalog: RwLock::new(self.catalog),
                loader: self.loader,
                overrides: self.overrides,
                sink: self.sink,
                debugger_probe: self.debugger_probe,
                next_unit_id: AtomicU64::new(1),
            }),
        }
    }
}

/// Resets a unit's timeout budget for the duration of a native call
struct TimeoutPause<'a> {
    stopwatch: &'a Stopwatch,
}

impl<'a> TimeoutPause<'a> {
    fn new(stopwatch: &'a Stopwatch) -> Self {
        stopwatch.reset();
        Self { stopwatch }
    }
}

impl Drop for TimeoutPause<'_> {
    fn drop(&mut self) {
        self.stopwatch.restart();
    }
}

/// Cloneable handle to a script scheduler
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    pub fn new(config: SchedulerConfig) -> Self {
        DomainBuilder::new(config).build()
    }

    pub fn builder(config: SchedulerConfig) -> DomainBuilder {
        DomainBuilder::new(config)
    }

    pub(crate) fn upgrade(inner: &Weak<DomainInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<DomainInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.inner.sink
    }

    /// Number of completed and in-progress ticks
    pub fn tick_count(&self) -> u64 {
        self.inner.turn.lock().tick_count
    }

    // ===== Host bindings =====

    /// Install or replace the privileged thread bindings
    pub fn install_host_bindings(&self, bindings: HostBindings) {
        debug!(
            target: "scripting",
            "Host bindings installed for privileged thread {}", bindings.privileged_thread_id
        );
        *self.inner.bindings.write() = Some(bindings);
    }

    pub fn host_bindings(&self) -> Option<HostBindings> {
        *self.inner.bindings.read()
    }

    // ===== Tick =====

    /// Give every runnable unit one turn, in registration order
    pub fn tick(&self) {
        {
            let mut turn = self.inner.turn.lock();
            if turn.in_tick {
                drop(turn);
                warn!(target: "scripting", "Domain::tick called re-entrantly, ignoring");
                return;
            }
            turn.in_tick = true;
            turn.tick_count += 1;
            turn.scheduler_thread = Some(thread::current().id());
        }

        self.dispatch_input();

        // Re-read the length each pass so units created mid-tick run this tick
        let mut index = 0;
        loop {
            let unit = {
                let registry = self.inner.registry.read();
                match registry.get(index) {
                    Some(unit) => unit.clone(),
                    None => break,
                }
            };
            index += 1;

            if !unit.is_running() || unit.is_paused() || !unit.is_due() {
                continue;
            }
            self.run_turn(&unit);
        }

        self.inner.turn.lock().in_tick = false;
        self.prune_aborted();

        let released = self.inner.pinned.release_all();
        if released > 0 {
            trace!(target: "scripting", "Released {} pinned string(s)", released);
        }
    }

    fn dispatch_input(&self) {
        let events = self.inner.input_rx.lock().drain();
        if events.is_empty() {
            return;
        }

        {
            let mut pressed = self.inner.pressed_keys.write();
            for event in &events {
                match event.kind {
                    KeyEventKind::Down => pressed.insert(event.key),
                    KeyEventKind::Up => pressed.remove(&event.key),
                };
            }
        }

        let registry = self.inner.registry.read();
        for unit in registry.iter().filter(|unit| unit.is_running()) {
            for event in &events {
                unit.push_input(event.clone());
            }
        }
    }

    fn run_turn(&self, unit: &Arc<ScriptUnit>) {
        self.inner.turn.lock().executing = Some(unit.clone());
        unit.set_executing(true);
        unit.stopwatch().restart();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if unit.has_dedicated_thread() {
                self.drive_worker(unit);
            } else {
                unit.do_tick(&self.downgrade());
            }
        }));

        unit.stopwatch().stop();
        unit.set_executing(false);
        self.inner.turn.lock().executing = None;

        let discarded = self.inner.tasks.discard();
        if discarded > 0 {
            debug!(
                target: "scripting",
                "Discarded {} task(s) left by {}", discarded, unit.identity()
            );
        }

        if let Err(payload) = outcome
            && !payload.is::<AbortSignal>()
        {
            unit.report(ScriptEvent::Fault {
                during: FaultPhase::Tick,
                message: panic_message(payload.as_ref()),
            });
            unit.abort();
        }

        let elapsed = unit.stopwatch().elapsed_ms();
        if unit.is_running() && self.over_budget(elapsed) {
            self.time_out(unit, elapsed);
        }

        if !unit.has_dedicated_thread() {
            unit.run_abort_hook();
        }
    }

    /// Hand the turn to a worker and serve its tasks until it parks
    fn drive_worker(&self, unit: &Arc<ScriptUnit>) {
        loop {
            if !self.signal_and_wait(unit) {
                return;
            }

            let mut served = 0usize;
            while let Some(task) = self.inner.tasks.pop() {
                if !unit.is_running() {
                    return;
                }
                served += 1;
                if let Err(err) = task.run() {
                    unit.report(ScriptEvent::Fault {
                        during: FaultPhase::Task,
                        message: err.to_string(),
                    });
                    unit.abort();
                    return;
                }
            }

            // An empty hand-off means the worker parked in `wait`
            if served == 0 || !unit.is_running() {
                return;
            }
        }
    }

    /// Release the worker and wait for it to yield. Returns false if the unit
    /// ran out of budget and was aborted instead.
    fn signal_and_wait(&self, unit: &ScriptUnit) -> bool {
        unit.signal_continue();
        let slice = Duration::from_millis(self.inner.config.watchdog_poll_ms.max(1));
        loop {
            if unit.wait_for_yield(slice) {
                return true;
            }
            let elapsed = unit.stopwatch().elapsed_ms();
            if self.over_budget(elapsed) {
                self.time_out(unit, elapsed);
                return false;
            }
        }
    }

    fn over_budget(&self, elapsed_ms: u64) -> bool {
        let limit = self.inner.config.script_timeout_ms;
        limit > 0 && elapsed_ms > limit && !self.debugger_attached()
    }

    fn debugger_attached(&self) -> bool {
        !self.inner.config.ignore_debugger && (self.inner.debugger_probe)()
    }

    fn time_out(&self, unit: &ScriptUnit, elapsed_ms: u64) {
        unit.report(ScriptEvent::TimedOut {
            elapsed_ms,
            threshold_ms: self.inner.config.script_timeout_ms,
        });
        unit.abort();
    }

    fn prune_aborted(&self) {
        if self.inner.turn.lock().in_tick {
            return;
        }
        let mut registry = self.inner.registry.write();
        let before = registry.len();
        registry.retain(|unit| !unit.is_aborted());
        let removed = before - registry.len();
        if removed > 0 {
            debug!(target: "scripting", "Removed {} aborted script(s)", removed);
        }
    }

    fn is_scheduler_thread(&self) -> bool {
        self.inner.turn.lock().scheduler_thread == Some(thread::current().id())
    }

    // ===== Bridge =====

    /// Run `f` on the scheduler thread and hand back its result.
    ///
    /// On the scheduler thread `f` runs immediately. From a script worker the
    /// call is queued and the worker yields, so the tick loop runs `f` before
    /// resuming it.
    pub fn execute_in_scheduler_thread<R, F>(&self, f: F) -> Result<R, BridgeError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_scheduler_thread() {
            return Ok(f());
        }

        let unit = current_unit().ok_or(BridgeError::NoAttachedUnit)?;
        unit.ensure_live()?;
        if !unit.is_executing() {
            return Err(BridgeError::NotExecuting(unit.name().to_string()));
        }

        let (task, result) = Task::with_result(f);
        self.inner.tasks.push(task);
        unit.yield_for_task();
        Ok(result.take()?)
    }

    /// Run `f` with the host's privileged execution context installed on the
    /// calling thread.
    ///
    /// On the privileged thread itself `f` runs directly. Elsewhere the
    /// calling unit's timeout budget is paused when its policy says so or
    /// `force_timeout_reset` is set.
    pub fn execute_with_privileged_context<R>(
        &self,
        f: impl FnOnce() -> R,
        force_timeout_reset: bool,
    ) -> Result<R, BridgeError> {
        let bindings = self
            .host_bindings()
            .ok_or(BridgeError::ContextNotInitialized)?;
        if bindings.is_privileged_thread() {
            return Ok(f());
        }

        let unit = match current_unit() {
            Some(unit) => Some(unit),
            None if self.is_scheduler_thread() => self.executing_script(),
            None => return Err(BridgeError::NoAttachedUnit),
        };
        if let Some(unit) = &unit {
            unit.ensure_live()?;
        }

        let _budget = unit
            .as_ref()
            .filter(|unit| force_timeout_reset || unit.resets_timeout_on_native_call())
            .map(|unit| TimeoutPause::new(unit.stopwatch()));
        let _swap = ContextSwapGuard::install(&bindings);
        Ok(f())
    }

    // ===== Registration =====

    /// Register a `Default`-constructible script type
    pub fn register<S: Script + Default>(&self, options: ScriptOptions) -> Arc<ScriptUnit> {
        self.register_script(Box::new(S::default()), None, options)
    }

    /// Register an existing script instance. The unit is not started.
    pub fn register_script(
        &self,
        script: Box<dyn Script>,
        file: Option<PathBuf>,
        mut options: ScriptOptions,
    ) -> Arc<ScriptUnit> {
        let name = script.name().to_string();
        if let Some(overrides) = self.inner.overrides.get(&name) {
            overrides.apply(&mut options);
        }

        let config = &self.inner.config;
        let settings = UnitSettings {
            dedicated_thread: options
                .dedicated_thread
                .unwrap_or(config.use_dedicated_threads),
            interval: options
                .interval
                .unwrap_or(Duration::from_millis(config.default_interval_ms)),
            reset_timeout_on_native_call: options.reset_timeout_on_native_call,
        };

        let id = self.inner.next_unit_id.fetch_add(1, Ordering::Relaxed);
        let unit = Arc::new(ScriptUnit::new(
            id,
            ScriptIdentity { name, file },
            script,
            settings,
            self.inner.sink.clone(),
        ));
        self.inner.registry.write().push(unit.clone());
        unit.report(ScriptEvent::Registered);
        unit
    }

    /// Load every script type declared in `path` and register one instance
    /// of each, skipping types marked `no_default_instance` or disabled in
    /// configuration. Loaded types are added to the catalog.
    pub fn register_file(&self, path: &Path) -> Result<Vec<Arc<ScriptUnit>>, HostError> {
        let loaded = match &self.inner.loader {
            Some(loader) => loader.load(path),
            None => self.inner.catalog.read().load(path),
        };
        let descriptors = loaded.map_err(|source| HostError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let mut units = Vec::new();
        for descriptor in descriptors {
            let descriptor = match descriptor.file {
                Some(_) => descriptor,
                None => descriptor.with_file(path),
            };
            self.inner.catalog.write().register(descriptor.clone());

            if descriptor.options.no_default_instance || !self.is_enabled(&descriptor.type_name) {
                debug!(target: "scripting", "Not instantiating {}", descriptor.type_name);
                continue;
            }
            units.push(self.register_descriptor(&descriptor));
        }
        Ok(units)
    }

    /// Add a script type to the catalog
    pub fn register_type(&self, descriptor: ScriptDescriptor) {
        self.inner.catalog.write().register(descriptor);
    }

    /// Create, register and start a new unit from the catalog
    pub fn instantiate(&self, type_name: &str) -> Result<UnitId, HostError> {
        let descriptor = self
            .inner
            .catalog
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| HostError::UnknownScriptType(type_name.to_string()))?;

        let unit = self.register_descriptor(&descriptor);
        self.start(&unit)?;
        Ok(unit.id())
    }

    fn register_descriptor(&self, descriptor: &ScriptDescriptor) -> Arc<ScriptUnit> {
        self.register_script(
            descriptor.instantiate(),
            descriptor.file.clone(),
            descriptor.options.clone(),
        )
    }

    /// Whether configuration allows the named script to run
    pub fn is_enabled(&self, name: &str) -> bool {
        self.inner
            .overrides
            .get(name)
            .is_none_or(|overrides| overrides.enabled)
    }

    /// Names of every script type in the catalog
    pub fn available_scripts(&self) -> Vec<String> {
        self.inner.catalog.read().available_scripts()
    }

    // ===== Lifecycle =====

    pub fn start(&self, unit: &Arc<ScriptUnit>) -> Result<(), HostError> {
        unit.start(self.downgrade())
    }

    /// Start every registered unit that has not been started yet
    pub fn start_all(&self) -> usize {
        let pending: Vec<_> = self
            .inner
            .registry
            .read()
            .iter()
            .filter(|unit| unit.state() == UnitState::Created)
            .cloned()
            .collect();

        let mut started = 0;
        for unit in pending {
            match self.start(&unit) {
                Ok(()) => started += 1,
                Err(err) => self
                    .inner
                    .sink
                    .log(DiagnosticLevel::Error, &format!("{}: {}", unit.identity(), err)),
            }
        }
        started
    }

    /// Abort every unit with the given name, returning how many were aborted
    pub fn abort_script(&self, name: &str) -> usize {
        self.abort_where(|unit| unit.name() == name)
    }

    /// Abort every unit loaded from `path`
    pub fn abort_scripts_in_file(&self, path: &Path) -> usize {
        self.abort_where(|unit| unit.file() == Some(path))
    }

    pub fn abort_all(&self) -> usize {
        self.abort_where(|_| true)
    }

    fn abort_where(&self, predicate: impl Fn(&ScriptUnit) -> bool) -> usize {
        let targets: Vec<_> = self
            .inner
            .registry
            .read()
            .iter()
            .filter(|unit| !unit.is_aborted() && predicate(unit))
            .cloned()
            .collect();

        for unit in &targets {
            unit.abort();
        }
        self.prune_aborted();
        targets.len()
    }

    /// Abort every unit and empty the registry
    pub fn unregister_all(&self) {
        let units = std::mem::take(&mut *self.inner.registry.write());
        for unit in &units {
            unit.abort();
        }
        if !units.is_empty() {
            debug!(target: "scripting", "Unregistered {} script(s)", units.len());
        }
    }

    /// First live unit with the given name
    pub fn lookup(&self, name: &str) -> Option<Arc<ScriptUnit>> {
        self.inner
            .registry
            .read()
            .iter()
            .find(|unit| !unit.is_aborted() && unit.name() == name)
            .cloned()
    }

    pub fn scripts(&self) -> Vec<ScriptInfo> {
        self.inner
            .registry
            .read()
            .iter()
            .map(|unit| ScriptInfo {
                id: unit.id(),
                name: unit.name().to_string(),
                file: unit.file().map(Path::to_path_buf),
                state: unit.state(),
            })
            .collect()
    }

    /// The unit currently holding the turn, if any
    pub fn executing_script(&self) -> Option<Arc<ScriptUnit>> {
        self.inner.turn.lock().executing.clone()
    }

    // ===== Input and host resources =====

    /// Producer for key events, delivered to scripts on the next tick
    pub fn input_sender(&self) -> InputSender {
        self.inner.input_tx.clone()
    }

    pub fn send_input(&self, event: KeyboardEvent) {
        self.inner.input_tx.send(event);
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.inner.pressed_keys.read().contains(&key)
    }

    /// Keep a NUL-terminated copy of `value` alive until the end of the
    /// current tick
    pub fn pin_str(&self, value: &str) -> Result<PinnedStr, HostError> {
        Ok(self.inner.pinned.pin(value)?)
    }
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("config", &self.inner.config)
            .field("scripts", &self.inner.registry.read().len())
            .finish_non_exhaustive()
    }
}
