use std::fmt;

/// Lifecycle notifications emitted for a script unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    Registered,
    Started { dedicated_thread: bool },
    Paused,
    Resumed,
    /// Fault raised from tick or input handling
    Fault { during: FaultPhase, message: String },
    /// The unit exceeded its per-turn wall-clock budget
    TimedOut { elapsed_ms: u64, threshold_ms: u64 },
    Aborted,
}

/// Where a script fault was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPhase {
    Start,
    Tick,
    KeyEvent,
    Task,
}

/// Severity of a diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

impl ScriptEvent {
    /// Severity this event should be reported at
    pub fn level(&self) -> DiagnosticLevel {
        match self {
            ScriptEvent::Fault {
                during: FaultPhase::KeyEvent,
                ..
            } => DiagnosticLevel::Warning,
            ScriptEvent::Fault { .. } | ScriptEvent::TimedOut { .. } => DiagnosticLevel::Error,
            _ => DiagnosticLevel::Info,
        }
    }
}

impl fmt::Display for FaultPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultPhase::Start => write!(f, "start"),
            FaultPhase::Tick => write!(f, "tick"),
            FaultPhase::KeyEvent => write!(f, "key event"),
            FaultPhase::Task => write!(f, "task"),
        }
    }
}

impl fmt::Display for ScriptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptEvent::Registered => write!(f, "registered"),
            ScriptEvent::Started { dedicated_thread } => {
                if *dedicated_thread {
                    write!(f, "started on a dedicated thread")
                } else {
                    write!(f, "started inline")
                }
            }
            ScriptEvent::Paused => write!(f, "paused"),
            ScriptEvent::Resumed => write!(f, "resumed"),
            ScriptEvent::Fault { during, message } => {
                write!(f, "fault during {}: {}", during, message)
            }
            ScriptEvent::TimedOut {
                elapsed_ms,
                threshold_ms,
            } => write!(
                f,
                "terminated because it blocked too long ({} ms, limit {} ms)",
                elapsed_ms, threshold_ms
            ),
            ScriptEvent::Aborted => write!(f, "aborted"),
        }
    }
}
