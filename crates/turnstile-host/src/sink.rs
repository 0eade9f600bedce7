use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};
use turnstile_events::{DiagnosticLevel, ScriptEvent};

/// Who a diagnostic is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptIdentity {
    pub name: String,
    pub file: Option<PathBuf>,
}

impl fmt::Display for ScriptIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{} ({})", self.name, file.display()),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Host-side destination for scheduler diagnostics
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, level: DiagnosticLevel, message: &str);

    /// Lifecycle notification for a single script
    fn script_event(&self, script: &ScriptIdentity, event: &ScriptEvent) {
        self.log(event.level(), &format!("{}: {}", script, event));
    }
}

/// Sink that forwards everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, level: DiagnosticLevel, message: &str) {
        match level {
            DiagnosticLevel::Info => info!(target: "scripting", "{}", message),
            DiagnosticLevel::Warning => warn!(target: "scripting", "{}", message),
            DiagnosticLevel::Error => error!(target: "scripting", "{}", message),
        }
    }
}
