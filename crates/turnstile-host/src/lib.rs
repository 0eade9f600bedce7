/// Cooperative script scheduler and cross-thread native-call bridge
///
/// Hosts many independently written scripts inside one process. Each script
/// may block, sleep and loop as if it owned a thread, while the [`Domain`]
/// makes sure only one of them runs at a time, routes native calls through
/// the host's privileged execution context, and aborts scripts that hold the
/// turn for too long.
use std::time::Duration;

pub mod config;
pub mod context;
pub mod debugger;
pub mod domain;
pub mod error;
pub mod native;
pub mod pinned;
pub mod registry;
pub mod semaphore;
pub mod sink;
pub mod stopwatch;
pub mod task;
pub mod unit;

pub use config::{
    ConfigLoadError, HostConfig, LoggingConfig, ProjectPaths, SchedulerConfig, ScriptConfig,
    TurnstileConfig,
};
pub use context::ScriptContext;
pub use domain::{Domain, DomainBuilder, ScriptInfo};
pub use error::{BridgeError, HostError, TaskError};
pub use native::{ContextHandle, HostBindings};
pub use pinned::PinnedStr;
pub use registry::{ScriptCatalog, ScriptDescriptor, ScriptFactory, ScriptLoader};
pub use sink::{DiagnosticSink, ScriptIdentity, TracingSink};
pub use stopwatch::Stopwatch;
pub use task::{Task, TaskResult};
pub use unit::{ScriptUnit, UnitId, UnitState};

pub use turnstile_events::{KeyCode, KeyEventKind, KeyModifiers, KeyboardEvent};

/// Trait that scripts implement
///
/// Callbacks run either on the script's own worker thread or inline on the
/// domain thread, never concurrently with another script.
pub trait Script: Send + 'static {
    /// Display name, defaults to the type name
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    /// Called once, before the first tick
    fn on_start(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once per turn. An error or panic aborts the script.
    fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()>;

    /// Called for each key event delivered since the last tick. Errors are
    /// logged and otherwise ignored.
    fn on_key(&mut self, _event: &KeyboardEvent, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called exactly once after the script has been aborted
    fn on_abort(&mut self) {}
}

/// Per-script scheduling options
#[derive(Debug, Clone, Default)]
pub struct ScriptOptions {
    /// Run on a dedicated worker thread. `None` follows the domain default.
    pub dedicated_thread: Option<bool>,
    /// Native calls reset this script's timeout budget
    pub reset_timeout_on_native_call: bool,
    /// Delay between ticks. `None` follows the domain default.
    pub interval: Option<Duration>,
    /// Skip this type when instantiating every script in a file
    pub no_default_instance: bool,
}

impl ScriptOptions {
    pub fn dedicated_thread(mut self, dedicated: bool) -> Self {
        self.dedicated_thread = Some(dedicated);
        self
    }

    pub fn reset_timeout_on_native_call(mut self, reset: bool) -> Self {
        self.reset_timeout_on_native_call = reset;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn no_default_instance(mut self) -> Self {
        self.no_default_instance = true;
        self
    }
}

/// Last path segment of a type's name, e.g. `HelloTicker`
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    // Ignore generic arguments when looking for the last segment
    let base = full.split('<').next().unwrap_or(full);
    match base.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
