use std::path::PathBuf;

/// Errors from registering and managing script units
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("script '{0}' has already been started")]
    AlreadyStarted(String),

    #[error("script '{0}' was aborted and cannot be restarted")]
    Aborted(String),

    #[error("no script type named '{0}' in the catalog")]
    UnknownScriptType(String),

    #[error("failed to load scripts from {path}: {source:#}")]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to spawn worker thread for '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("string passed to native code contains an interior NUL byte")]
    InteriorNul(#[from] std::ffi::NulError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Errors from routing work to the scheduler or privileged thread
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("host bindings for the privileged thread have not been installed")]
    ContextNotInitialized,

    #[error("calling thread is neither the scheduler thread nor a script worker")]
    NoAttachedUnit,

    #[error("script '{0}' does not currently hold the scheduler turn")]
    NotExecuting(String),

    #[error("scheduler has shut down")]
    SchedulerGone,

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Failure of a task that was handed to the scheduler thread
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was discarded before it ran")]
    Dropped,
}

/// Render a panic payload as text for diagnostics
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
