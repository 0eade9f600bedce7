//! Builder pattern for HostRunner

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use turnstile_host::{DiagnosticSink, Domain, ScriptCatalog, ScriptDescriptor, TurnstileConfig};

use crate::host_runner::HostRunner;
use crate::reload::ReloadHandle;

/// Error during builder configuration
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No scripts to run - use .with_script() or .with_script_file()")]
    NoScripts,
    #[error("Frame duration must be at least 1 ms")]
    ZeroFrameDuration,
}

/// Builder for HostRunner
pub struct HostRunnerBuilder {
    catalog: ScriptCatalog,
    scripts: Vec<String>,
    files: Vec<PathBuf>,
    shutdown_rx: Option<watch::Receiver<bool>>,
    max_frames: Option<u64>,
    sink: Option<Arc<dyn DiagnosticSink>>,
    app_config: Option<TurnstileConfig>,
}

impl HostRunnerBuilder {
    pub fn new() -> Self {
        Self {
            catalog: ScriptCatalog::new(),
            scripts: Vec::new(),
            files: Vec::new(),
            shutdown_rx: None,
            max_frames: None,
            sink: None,
            app_config: None,
        }
    }

    /// Script types that can be started by name
    pub fn with_catalog(mut self, catalog: ScriptCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Add a script type to the catalog and start one instance of it
    pub fn with_script(mut self, descriptor: ScriptDescriptor) -> Self {
        self.scripts.push(descriptor.type_name.clone());
        self.catalog.register(descriptor);
        self
    }

    /// Start one instance of a script type already in the catalog
    pub fn with_script_named(mut self, type_name: impl Into<String>) -> Self {
        self.scripts.push(type_name.into());
        self
    }

    /// Start every script type declared in a file
    pub fn with_script_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Stop when the receiver sees `true`. Without one, Ctrl+C stops the runner.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    /// Stop after this many frames
    pub fn max_frames(mut self, frames: u64) -> Self {
        self.max_frames = Some(frames);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set application config (optional - will load from default location if not specified)
    pub fn with_config(mut self, config: TurnstileConfig) -> Self {
        self.app_config = Some(config);
        self
    }

    /// Build the HostRunner
    ///
    /// If config was not provided via `with_config()`, it will be loaded
    /// from the default location, falling back to defaults.
    ///
    /// # Example
    /// ```no_run
    /// # use turnstile_runner::HostRunner;
    /// # use turnstile_host::{Script, ScriptContext, ScriptDescriptor};
    /// # #[derive(Default)] struct Hello;
    /// # impl Script for Hello {
    /// #     fn on_tick(&mut self, _ctx: &mut ScriptContext) -> anyhow::Result<()> { Ok(()) }
    /// # }
    /// # async fn example() {
    /// let summary = HostRunner::builder()
    ///     .with_script(ScriptDescriptor::of::<Hello>())
    ///     .max_frames(100)
    ///     .build()
    ///     .unwrap()
    ///     .run()
    ///     .await;
    /// # }
    /// ```
    pub fn build(self) -> Result<HostRunner, BuildError> {
        if self.scripts.is_empty() && self.files.is_empty() {
            return Err(BuildError::NoScripts);
        }

        let config = match self.app_config {
            Some(cfg) => cfg,
            None => TurnstileConfig::load().unwrap_or_else(|e| {
                info!("Using default config ({})", e);
                TurnstileConfig::default()
            }),
        };
        if config.host.frame_ms == 0 {
            return Err(BuildError::ZeroFrameDuration);
        }

        let mut domain = Domain::builder(config.scheduler.clone())
            .with_catalog(self.catalog)
            .with_script_overrides(config.scripts.clone());
        if let Some(sink) = self.sink {
            domain = domain.with_sink(sink);
        }

        Ok(HostRunner {
            domain: domain.build(),
            config,
            scripts: self.scripts,
            files: self.files,
            shutdown_rx: self.shutdown_rx,
            max_frames: self.max_frames,
            reload: ReloadHandle::new(),
        })
    }
}

impl Default for HostRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
