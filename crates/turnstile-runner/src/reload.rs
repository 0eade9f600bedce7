use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Shared flag asking the frame loop to abort every script and start them again
#[derive(Debug, Clone, Default)]
pub struct ReloadHandle {
    requested: Arc<AtomicBool>,
}

impl ReloadHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a restart at the end of the current frame
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

/// Request a script restart whenever the process receives SIGUSR2.
///
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn setup_reload_signal_handler(handle: ReloadHandle) {
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        while sigusr2.recv().await.is_some() {
            info!(target: "scripting", "Received SIGUSR2 - restarting scripts");
            handle.request();
        }
    });
}

#[cfg(not(unix))]
pub fn setup_reload_signal_handler(_handle: ReloadHandle) {
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
}
