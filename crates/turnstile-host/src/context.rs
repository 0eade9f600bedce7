use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use turnstile_events::{DiagnosticLevel, KeyCode};

use crate::domain::{Domain, DomainInner};
use crate::error::{BridgeError, HostError};
use crate::pinned::PinnedStr;
use crate::unit::{ScriptUnit, UnitId};

/// Context provided to scripts for interacting with the scheduler and host
///
/// Holds the domain weakly, so a script parked mid-tick never keeps a
/// dropped domain alive.
pub struct ScriptContext {
    unit: Arc<ScriptUnit>,
    domain: Weak<DomainInner>,
}

impl ScriptContext {
    pub(crate) fn new(unit: Arc<ScriptUnit>, domain: Weak<DomainInner>) -> Self {
        Self { unit, domain }
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn file(&self) -> Option<&Path> {
        self.unit.file()
    }

    pub fn id(&self) -> UnitId {
        self.unit.id()
    }

    pub fn unit(&self) -> &Arc<ScriptUnit> {
        &self.unit
    }

    /// Handle to the owning domain, unless it has been dropped
    pub fn domain(&self) -> Result<Domain, BridgeError> {
        Domain::upgrade(&self.domain).ok_or(BridgeError::SchedulerGone)
    }

    // ===== Scheduling =====

    /// Give up the turn for at least `duration`
    pub fn wait(&self, duration: Duration) {
        self.unit.wait(duration);
    }

    /// Give up the turn until the next tick
    pub fn yield_now(&self) {
        self.unit.wait(Duration::ZERO);
    }

    pub fn interval(&self) -> Duration {
        self.unit.interval()
    }

    /// Change the delay between this script's ticks
    pub fn set_interval(&self, interval: Duration) {
        self.unit.set_interval(interval);
    }

    /// Abort this script once the current callback returns
    pub fn abort(&self) {
        self.unit.abort();
    }

    // ===== Bridge =====

    /// Run `f` on the domain thread and hand back its result
    pub fn run_on_scheduler<R, F>(&self, f: F) -> Result<R, BridgeError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.domain()?.execute_in_scheduler_thread(f)
    }

    /// Run `f` with the host's privileged execution context installed
    pub fn call_native<R>(&self, f: impl FnOnce() -> R) -> Result<R, BridgeError> {
        self.domain()?.execute_with_privileged_context(f, false)
    }

    /// Like [`call_native`](Self::call_native), for calls expected to block.
    /// The timeout budget is paused for the duration of the call.
    pub fn call_native_blocking<R>(&self, f: impl FnOnce() -> R) -> Result<R, BridgeError> {
        self.domain()?.execute_with_privileged_context(f, true)
    }

    /// Keep a NUL-terminated copy of `value` alive until the end of this tick
    pub fn pin_str(&self, value: &str) -> Result<PinnedStr, HostError> {
        self.domain()?.pin_str(value)
    }

    // ===== Domain access =====

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.domain().is_ok_and(|domain| domain.is_key_pressed(key))
    }

    /// Create and start another script from the catalog
    pub fn start_script(&self, type_name: &str) -> Result<UnitId, HostError> {
        let domain = self.domain()?;
        let type_name = type_name.to_string();
        self.run_on_scheduler(move || domain.instantiate(&type_name))?
    }

    /// Log through the domain's diagnostic sink, tagged with this script
    pub fn log(&self, level: DiagnosticLevel, message: impl AsRef<str>) {
        self.unit
            .sink()
            .log(level, &format!("{}: {}", self.unit.identity(), message.as_ref()));
    }
}
