//! Configuration for the lcdlink service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lcdlink_core::{DeviceConfig, DeviceSelector, DisplayConfig, LcdError, LinkSettings};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Hot-reload settings.
    pub reload: ReloadConfig,
    /// One entry per panel to drive.
    pub devices: Vec<DeviceEntry>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
}

/// Hot-reload settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Watch the config file for changes.
    pub enabled: bool,
    /// How often the file's modification time is checked.
    pub poll_interval_ms: u64,
}

/// One `[[devices]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceEntry {
    /// Label used in logs and to match entries across reloads.
    pub name: String,
    #[serde(flatten)]
    pub selector: DeviceSelector,
    pub display: DisplayConfig,
    pub link: LinkSettings,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            reload: ReloadConfig::default(),
            devices: vec![DeviceEntry::default()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 2000,
        }
    }
}

impl Default for DeviceEntry {
    fn default() -> Self {
        Self {
            name: "panel".into(),
            selector: DeviceSelector::default(),
            display: DisplayConfig {
                path: PathBuf::from("background.png"),
                ..Default::default()
            },
            link: LinkSettings::default(),
        }
    }
}

impl ReloadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }
}

impl DeviceEntry {
    /// The snapshot handed to this device's scheduler.
    pub fn to_device_config(&self) -> DeviceConfig {
        DeviceConfig {
            selector: self.selector.clone(),
            display: self.display.clone(),
            link: self.link.clone(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServiceConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Strict load used by hot reload: any error keeps the caller's
    /// current configuration.
    pub fn try_load(path: &Path) -> Result<Self, LcdError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(text: &str) -> Result<Self, LcdError> {
        toml::from_str(text).map_err(|e| LcdError::InvalidConfig(e.to_string()))
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default().to_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Device entries keyed by a unique name.
    ///
    /// Empty names become `device<N>`; repeated names get a `-<N>` suffix
    /// so that every scheduler can be told apart across reloads.
    pub fn named_devices(&self) -> Vec<(String, DeviceConfig)> {
        let mut out: Vec<(String, DeviceConfig)> = Vec::with_capacity(self.devices.len());
        for (i, entry) in self.devices.iter().enumerate() {
            let base = match entry.name.trim() {
                "" => format!("device{i}"),
                name => name.to_string(),
            };
            let mut name = base.clone();
            let mut n = 1;
            while out.iter().any(|(existing, _)| *existing == name) {
                name = format!("{base}-{n}");
                n += 1;
            }
            out.push((name, entry.to_device_config()));
        }
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────
