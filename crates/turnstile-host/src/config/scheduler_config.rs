use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ScriptOptions;

/// Scheduler-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest a script may hold the turn before it is aborted. 0 disables
    /// the watchdog.
    pub script_timeout_ms: u64,

    /// Run scripts on dedicated worker threads unless they ask otherwise
    pub use_dedicated_threads: bool,

    /// Delay between a script's ticks unless it sets its own
    pub default_interval_ms: u64,

    /// How often the watchdog checks a script that has not yielded
    pub watchdog_poll_ms: u64,

    /// Enforce timeouts even while a debugger is attached
    pub ignore_debugger: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            script_timeout_ms: 5000,
            use_dedicated_threads: true,
            default_interval_ms: 0,
            watchdog_poll_ms: 10,
            ignore_debugger: false,
        }
    }
}

impl SchedulerConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to a file in the data directory
    pub file: bool,
}

/// Per-script overrides, keyed by script name in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_timeout_on_native_call: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reset_timeout_on_native_call: None,
            interval_ms: None,
        }
    }
}

impl ScriptConfig {
    /// Layer these overrides on top of the options a script registered with
    pub fn apply(&self, options: &mut ScriptOptions) {
        if let Some(reset) = self.reset_timeout_on_native_call {
            options.reset_timeout_on_native_call = reset;
        }
        if let Some(interval_ms) = self.interval_ms {
            options.interval = Some(Duration::from_millis(interval_ms));
        }
    }
}
