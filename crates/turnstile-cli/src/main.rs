use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use turnstile_host::{ConfigLoadError, TurnstileConfig};
use turnstile_runner::{HostRunner, logging, setup_reload_signal_handler};

mod keyboard;
mod scripts;

#[derive(Parser)]
#[command(version = env!("VERSION_STRING"), about, long_about = None)]
pub struct Cli {
    /// Enables debug logging (-dd for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Frame duration in milliseconds
    #[arg(long)]
    frame_ms: Option<u64>,

    /// Script timeout in milliseconds (0 disables the watchdog)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Run scripts inline on the frame thread instead of on worker threads
    #[arg(long)]
    inline: bool,

    /// Forward terminal key presses to scripts
    #[arg(short, long)]
    keyboard: bool,

    /// Also log to a file in the data directory
    #[arg(long)]
    log_file: bool,

    /// Scripts to run (default: every demo script except Runaway)
    #[arg(short, long = "script")]
    scripts: Vec<String>,

    /// Also run the Runaway script, which the watchdog will abort
    #[arg(long)]
    runaway: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<TurnstileConfig> {
    let loaded = match &cli.config {
        Some(path) => TurnstileConfig::load_from(path),
        None => TurnstileConfig::load(),
    };

    let mut config = match loaded {
        Ok(config) => config,
        Err(ConfigLoadError::NotFound) if cli.config.is_none() => TurnstileConfig::default(),
        Err(e) => {
            let path = cli
                .config
                .clone()
                .or_else(TurnstileConfig::config_path)
                .unwrap_or_default();
            return Err(e).with_context(|| format!("loading {}", path.display()));
        }
    };

    if let Some(frame_ms) = cli.frame_ms {
        config.host.frame_ms = frame_ms;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.scheduler.script_timeout_ms = timeout_ms;
    }
    if cli.inline {
        config.scheduler.use_dedicated_threads = false;
    }
    if cli.log_file {
        config.logging.file = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _log_guard = logging::init_logging_with_filter("turnstile", config.logging.file, filter)?;

    let catalog = scripts::catalog();
    let mut names = cli.scripts.clone();
    if names.is_empty() {
        names = ["HelloTicker", "KeyLogger", "NativeCounter"]
            .map(String::from)
            .to_vec();
    }
    if cli.runaway {
        names.push("Runaway".to_string());
    }
    for name in &names {
        if catalog.get(name).is_none() {
            bail!(
                "Unknown script '{}'. Available scripts: {}",
                name,
                catalog.available_scripts().join(", ")
            );
        }
    }

    info!("Starting turnstile {}", env!("VERSION_STRING"));

    let mut builder = HostRunner::builder()
        .with_catalog(catalog)
        .with_config(config);
    for name in names {
        builder = builder.with_script_named(name);
    }
    if let Some(frames) = cli.frames {
        builder = builder.max_frames(frames);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if cli.keyboard {
        builder = builder.with_shutdown(shutdown_rx);
    }

    let runner = builder.build()?;
    setup_reload_signal_handler(runner.reload_handle());

    let forwarder = if cli.keyboard {
        Some(keyboard::spawn_forwarder(runner.input_sender(), shutdown_tx.clone())?)
    } else {
        None
    };

    let summary = runner.run().await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = forwarder {
        let _ = handle.join();
    }

    info!(
        "Ran {} frame(s) with {} reload(s)",
        summary.frames, summary.reloads
    );
    Ok(())
}
