pub mod paths;
pub mod scheduler_config;
pub mod turnstile_config;

pub use paths::ProjectPaths;
pub use scheduler_config::{LoggingConfig, SchedulerConfig, ScriptConfig};
pub use turnstile_config::{ConfigLoadError, HostConfig, TurnstileConfig};
