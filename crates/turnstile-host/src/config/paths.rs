use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Platform-specific locations for configuration and data.
///
/// On Linux this follows the XDG Base Directory spec
/// (`~/.config/{name}`, `~/.local/share/{name}`), on Windows `%APPDATA%`.
pub struct ProjectPaths {
    dirs: ProjectDirs,
}

impl ProjectPaths {
    /// Paths for the given application name, or `None` if no home directory
    /// can be determined
    pub fn new(name: &str) -> Option<Self> {
        ProjectDirs::from("", "", name).map(|dirs| Self { dirs })
    }

    pub fn config_dir(&self) -> &Path {
        self.dirs.config_dir()
    }

    pub fn data_dir(&self) -> &Path {
        self.dirs.data_dir()
    }

    /// Directory for log files
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}
