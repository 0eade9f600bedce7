use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use turnstile_events::InputSender;
use turnstile_host::{Domain, TurnstileConfig};

use crate::host_runner_builder::HostRunnerBuilder;
use crate::native_host;
use crate::reload::ReloadHandle;

/// Errors from running the frame loop
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn frame thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("frame thread panicked")]
    FrameThreadPanicked,
}

/// What happened during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub reloads: u64,
}

/// Configured host runner ready to execute
///
/// Owns a [`Domain`] and drives it from a dedicated frame thread, which plays
/// the role of the host's privileged main thread.
pub struct HostRunner {
    pub(crate) domain: Domain,
    pub(crate) config: TurnstileConfig,
    pub(crate) scripts: Vec<String>,
    pub(crate) files: Vec<PathBuf>,
    pub(crate) shutdown_rx: Option<watch::Receiver<bool>>,
    pub(crate) max_frames: Option<u64>,
    pub(crate) reload: ReloadHandle,
}

impl HostRunner {
    pub fn builder() -> HostRunnerBuilder {
        HostRunnerBuilder::new()
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn config(&self) -> &TurnstileConfig {
        &self.config
    }

    /// Producer for key events delivered to scripts
    pub fn input_sender(&self) -> InputSender {
        self.domain.input_sender()
    }

    /// Handle for requesting a restart of every script
    pub fn reload_handle(&self) -> ReloadHandle {
        self.reload.clone()
    }

    /// Run until shutdown, Ctrl+C (if no shutdown receiver was given) or the
    /// frame limit
    pub async fn run(mut self) -> Result<RunSummary, RunError> {
        let ctrl_c = if self.shutdown_rx.is_none() {
            let (tx, rx) = watch::channel(false);
            self.shutdown_rx = Some(rx);
            Some(tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    let _ = tx.send(true);
                }
            }))
        } else {
            None
        };

        let (done_tx, done_rx) = oneshot::channel();
        thread::Builder::new()
            .name("frame".to_string())
            .spawn(move || {
                let summary = self.run_frames();
                let _ = done_tx.send(summary);
            })?;

        let result = done_rx.await.map_err(|_| RunError::FrameThreadPanicked);
        if let Some(task) = ctrl_c {
            task.abort();
        }
        result
    }

    /// Run on a new frame thread and block until it finishes
    pub fn run_blocking(self) -> Result<RunSummary, RunError> {
        let handle = thread::Builder::new()
            .name("frame".to_string())
            .spawn(move || self.run_frames())?;
        handle.join().map_err(|_| RunError::FrameThreadPanicked)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// The frame loop. Runs on the thread that becomes the privileged thread.
    fn run_frames(self) -> RunSummary {
        self.domain
            .install_host_bindings(native_host::become_frame_thread());

        let frame = Duration::from_millis(self.config.host.frame_ms);
        let reload_key = self.config.host.reload_key;
        let mut reload_key_down = false;
        let mut summary = RunSummary::default();

        info!(
            "Frame loop started ({} ms frames, {:?} script timeout)",
            self.config.host.frame_ms,
            self.config.scheduler.script_timeout()
        );
        self.start_scripts();

        loop {
            if self.shutdown_requested() {
                info!("Frame loop received shutdown signal");
                break;
            }
            if let Some(max) = self.max_frames
                && summary.frames >= max
            {
                info!("Reached frame limit of {}", max);
                break;
            }

            let started = Instant::now();
            native_host::advance_frame();
            self.domain.tick();
            summary.frames += 1;

            if let Some(key) = reload_key {
                let down = self.domain.is_key_pressed(key);
                if down && !reload_key_down {
                    self.reload.request();
                }
                reload_key_down = down;
            }
            if self.reload.take() {
                self.restart_scripts();
                summary.reloads += 1;
            }

            match frame.checked_sub(started.elapsed()) {
                Some(rest) => thread::sleep(rest),
                None => debug!("Frame {} overran by {:?}", summary.frames, started.elapsed() - frame),
            }
        }

        self.domain.unregister_all();
        info!(
            "Frame loop stopped after {} frame(s), {} reload(s)",
            summary.frames, summary.reloads
        );
        summary
    }

    fn start_scripts(&self) {
        for file in &self.files {
            match self.domain.register_file(file) {
                Ok(units) => info!("Loaded {} script(s) from {}", units.len(), file.display()),
                Err(e) => error!("{}", e),
            }
        }

        for name in &self.scripts {
            if !self.domain.is_enabled(name) {
                info!("Script {} is disabled in config", name);
                continue;
            }
            if let Err(e) = self.domain.instantiate(name) {
                error!("Failed to start script {}: {}", name, e);
            }
        }

        let started = self.domain.start_all();
        if started > 0 {
            debug!("Started {} script(s) from files", started);
        }
        if self.domain.scripts().is_empty() {
            warn!("No scripts are running");
        }
    }

    fn restart_scripts(&self) {
        info!("Restarting all scripts");
        self.domain.unregister_all();
        self.start_scripts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use turnstile_host::{
        KeyCode, KeyboardEvent, Script, ScriptContext, ScriptDescriptor, ScriptOptions,
    };

    struct Counter {
        starts: Arc<AtomicUsize>,
        ticks: Arc<AtomicUsize>,
    }

    impl Script for Counter {
        fn on_start(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_tick(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counter(starts: &Arc<AtomicUsize>, ticks: &Arc<AtomicUsize>) -> ScriptDescriptor {
        let (starts, ticks) = (starts.clone(), ticks.clone());
        ScriptDescriptor::new("Counter", move || {
            Box::new(Counter {
                starts: starts.clone(),
                ticks: ticks.clone(),
            })
        })
    }

    fn fast_config() -> TurnstileConfig {
        let mut config = TurnstileConfig::default();
        config.host.frame_ms = 1;
        config
    }

    #[test]
    fn test_runs_until_frame_limit() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicUsize::new(0));
        let runner = HostRunner::builder()
            .with_script(counter(&starts, &ticks))
            .with_config(fast_config())
            .max_frames(5)
            .build()
            .unwrap();
        let domain = runner.domain().clone();

        let summary = runner.run_blocking().unwrap();

        assert_eq!(summary.frames, 5);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert!(domain.scripts().is_empty());
    }

    #[test]
    fn test_disabled_script_is_not_started() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut config = fast_config();
        config.scripts.insert(
            "Counter".to_string(),
            turnstile_host::ScriptConfig {
                enabled: false,
                ..Default::default()
            },
        );

        let summary = HostRunner::builder()
            .with_script(counter(&starts, &ticks))
            .with_config(config)
            .max_frames(3)
            .build()
            .unwrap()
            .run_blocking()
            .unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reload_key_restarts_scripts() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut config = fast_config();
        config.host.reload_key = Some(KeyCode::F(5));

        let runner = HostRunner::builder()
            .with_script(counter(&starts, &ticks))
            .with_config(config)
            .max_frames(10)
            .build()
            .unwrap();
        runner
            .input_sender()
            .send(KeyboardEvent::key_down(KeyCode::F(5)));

        let summary = runner.run_blocking().unwrap();

        assert_eq!(summary.reloads, 1);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(ticks.load(Ordering::SeqCst), 10);
    }

    struct NativeReader {
        frames: Arc<Mutex<Vec<Result<u64, String>>>>,
    }

    #[test]
    fn test_worker_reads_frame_through_bridge() {
        let frames = Arc::new(Mutex::new(Vec::new()));

        impl Script for NativeReader {
            fn on_tick(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
                let direct = native_host::frame_number().map_err(|e| e.to_string());
                let bridged = ctx.call_native(native_host::frame_number)?;
                let mut frames = self.frames.lock().unwrap();
                frames.push(direct);
                frames.push(bridged.map_err(|e| e.to_string()));
                Ok(())
            }
        }

        let record = frames.clone();
        let descriptor = ScriptDescriptor::new("NativeReader", move || {
            Box::new(NativeReader {
                frames: record.clone(),
            })
        })
        .with_options(ScriptOptions::default().dedicated_thread(true));

        HostRunner::builder()
            .with_script(descriptor)
            .with_config(fast_config())
            .max_frames(1)
            .build()
            .unwrap()
            .run_blocking()
            .unwrap();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert!(frames[1].is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_run() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = HostRunner::builder()
            .with_script(counter(&starts, &ticks))
            .with_config(fast_config())
            .with_shutdown(shutdown_rx)
            .build()
            .unwrap();

        let run = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        let summary = run.await.unwrap().unwrap();
        assert!(summary.frames > 0);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }
}
