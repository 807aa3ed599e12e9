//! Console settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use lab_hub::{GenericDriverConfig, HubConfig};
use serde::{Deserialize, Serialize};

/// One instrument line: which driver, on which port, measuring what
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentLine {
    /// Driver name (`NONE` or empty for a placeholder)
    pub name: String,
    /// Port or resource identifier
    #[serde(default)]
    pub port: String,
    /// Channel to measure
    #[serde(default)]
    pub parameter: String,
}

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Hub configuration
    #[serde(default)]
    pub hub: HubConfig,
    /// Instrument types defined in configuration
    #[serde(default)]
    pub drivers: Vec<GenericDriverConfig>,
    /// Instruments connected by `poll`, in polling order
    #[serde(default)]
    pub instruments: Vec<InstrumentLine>,
}

impl Settings {
    /// Get the XDG config directory for labhub
    /// Uses $XDG_CONFIG_HOME/labhub, falls back to ~/.config/labhub
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("labhub"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("labhub"))
    }

    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from `path`, or from the default location
    ///
    /// A missing file yields the defaults; an unreadable or malformed one
    /// is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Save settings to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    /// Parallel name / port / parameter lists for `connect_hub`
    pub fn instrument_lists(&self) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        let names = self.instruments.iter().map(|l| l.name.as_str()).collect();
        let ports = self.instruments.iter().map(|l| l.port.as_str()).collect();
        let params = self.instruments.iter().map(|l| l.parameter.as_str()).collect();
        (names, ports, params)
    }
}
