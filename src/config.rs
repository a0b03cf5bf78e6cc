//! Configuration for the JogKit front end
//!
//! A TOML file in the platform config directory, with defaults when absent.
//! Sections:
//! - Connection settings (last used port, symbol rate)
//! - Pacer tuning (stroke distance, feed clamps and step)

use anyhow::Context;
use jogkit_link::{PacerConfig, BAUD_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Last used port, or "Auto" to pick from enumeration
    pub port: String,
    /// Symbol rate for the link
    pub baud_rate: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "Auto".to_string(),
            baud_rate: BAUD_RATE,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Connection defaults
    pub connection: ConnectionSettings,
    /// Jog pacer tuning
    pub pacer: PacerConfig,
}

impl AppConfig {
    /// Platform config file location (e.g. `~/.config/jogkit/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("jogkit").join("config.toml"))
    }

    /// Load from the default location; defaults when the file is missing or
    /// unreadable (a broken config file is reported, not fatal).
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Write to an explicit file, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
