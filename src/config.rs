//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Overrides the data directory (used by the LaunchAgent plist and tests)
const DATA_DIR_ENV: &str = "GLOBE_HOTKEY_DATA_DIR";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// JSON settings file holding the persisted hotkey
    pub settings_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// How often to re-check accessibility permission while not listening
    pub permission_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        Ok(Self::with_data_dir(data_dir))
    }

    /// Configuration rooted at an explicit data directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            settings_path: data_dir.join("settings.json"),
            data_dir,
            permission_poll_interval: Duration::from_secs(2),
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join("globe-hotkey"));
    }

    let home = std::env::var("HOME").context("neither a data directory nor HOME is available")?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("globe-hotkey"))
}
