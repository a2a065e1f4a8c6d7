//! Connection configuration and settings-file plumbing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Name of the directory peers advertise themselves in.
pub const INSTANCES_DIR_NAME: &str = "instances";

/// Default direct-connect host.
pub const DEFAULT_HOSTNAME: &str = "localhost";

/// Default direct-connect port.
pub const DEFAULT_PORT: u16 = 40404;

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// How the controller finds its peer.
///
/// A new value replaces the old one wholesale; the controller compares values
/// and only restarts when something actually changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Find peers by watching `watch_dir` instead of dialing `hostname:port`.
    pub discovery_mode: bool,
    /// Directory holding peer descriptor files.
    pub watch_dir: PathBuf,
    /// Host used in direct mode.
    pub hostname: String,
    /// Port used in direct mode.
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            discovery_mode: true,
            watch_dir: default_instances_dir(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ConnectionConfig {
    /// Direct-mode config for `hostname:port`.
    pub fn direct(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            discovery_mode: false,
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }

    /// Discovery-mode config watching `watch_dir`.
    pub fn discovery(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            discovery_mode: true,
            watch_dir: watch_dir.into(),
            ..Self::default()
        }
    }

    /// Expand a leading `~` in `watch_dir`; if the result does not exist,
    /// fall back to the default instances directory.
    pub fn normalized(mut self) -> Self {
        let expanded = expand_home(&self.watch_dir);
        if expanded.exists() {
            self.watch_dir = expanded;
        } else {
            let fallback = default_instances_dir();
            if expanded != fallback {
                warn!(
                    "Instances directory {} does not exist, falling back to {}",
                    expanded.display(),
                    fallback.display()
                );
            }
            self.watch_dir = fallback;
        }
        self
    }

    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Load the config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Load config from a JSON file, or return defaults if the file is missing
    /// or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Corrupt config file, using defaults: {e:#}");
                Self::default()
            }
        }
    }
}

/// `~/.veadotube/instances`, or a relative path if the home directory is
/// unknown.
pub fn default_instances_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".veadotube")
        .join(INSTANCES_DIR_NAME)
}

/// Replace a leading `~` component with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// AppPaths
// ---------------------------------------------------------------------------

/// Locations of the standalone host's own files under `~/.veadolink`.
pub struct AppPaths;

impl AppPaths {
    /// Returns the base directory: `~/.veadolink`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".veadolink"))
    }

    /// Returns the settings file path: `~/.veadolink/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.veadolink/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }
}

// ---------------------------------------------------------------------------
// ConfigWatcher
// ---------------------------------------------------------------------------

/// Hot-reloads a settings file.
///
/// Every filesystem event touching the file triggers a reload; configs that
/// parse are handed to the callback. The watcher stays active as long as this
/// struct is alive.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn new(
        config_path: &Path,
        on_change: impl Fn(ConnectionConfig) + Send + 'static,
    ) -> Result<Self> {
        let watch_dir = config_path
            .parent()
            .context("Config path has no parent directory")?
            .to_path_buf();
        let file_name = config_path
            .file_name()
            .context("Config path has no file name")?
            .to_os_string();
        let reload_path = config_path.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            if !event.kind.is_create() && !event.kind.is_modify() {
                return;
            }
            if !event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                return;
            }
            match ConnectionConfig::load(&reload_path) {
                Ok(config) => {
                    info!("Config hot-reloaded");
                    on_change(config);
                }
                Err(e) => debug!("Config not reloadable yet: {e:#}"),
            }
        })
        .context("Failed to create config watcher")?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch path: {}", watch_dir.display()))?;

        Ok(Self { _watcher: watcher })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
