mod host_runner;
mod host_runner_builder;
pub mod logging;
pub mod native_host;
mod reload;

pub use host_runner::{HostRunner, RunError, RunSummary};
pub use host_runner_builder::{BuildError, HostRunnerBuilder};
pub use native_host::{NativeCallError, frame_number};
pub use reload::{ReloadHandle, setup_reload_signal_handler};
