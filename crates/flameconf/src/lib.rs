//! Configuration loading for Flamatik.
//!
//! Two kinds of configuration feed the daemon:
//!
//! - **Settings** (`FlameConfig`, TOML): ports, frame rates, button handling,
//!   log level. Loaded in layers so a sculpture laptop can carry a system
//!   file and a show operator can override a single value.
//!
//! - **Sculpture layout** (`SculptureConfig`, JSON): how many nozzles exist,
//!   which controller drives which nozzle, and the per-nozzle aperture
//!   calibration. This file describes physical wiring and is loaded once.
//!
//! # Settings File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/flamatik/config.toml` (system)
//! 2. `~/.config/flamatik/config.toml` (user)
//! 3. `./flamatik.toml` or the `--settings` path (local override)
//! 4. Environment variables (`FLAMATIK_*`)
//!
//! # Example Settings
//!
//! ```toml
//! [bind]
//! osc_address = "0.0.0.0"
//! osc_port = 6511
//! command_port = 6509
//!
//! [show]
//! fps = 15
//! buttons = true
//! broadcast = "10.0.0.255"
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod infra;
pub mod loader;
pub mod sculpture;
pub mod show;

pub use infra::{BindConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sculpture::{Calibration, ControllerConfig, SculptureConfig};
pub use show::ShowConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FlameConfig {
    /// Network bind addresses and ports.
    #[serde(default)]
    pub bind: BindConfig,

    /// Show behavior: frame rates, buttons, status broadcast.
    #[serde(default)]
    pub show: ShowConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl FlameConfig {
    /// Load settings from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load settings, letting `config_path` replace the local override file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load settings and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.show.fps == 0 {
            return Err(ConfigError::Invalid("show.fps must be at least 1".to_string()));
        }
        if self.show.status_fps == 0 {
            return Err(ConfigError::Invalid(
                "show.status_fps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize settings to a TOML string.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FlameConfig::default();
        assert_eq!(config.bind.command_port, 6509);
        assert_eq!(config.show.fps, 15);
        assert!(config.show.buttons);
    }

    #[test]
    fn test_to_toml() {
        let toml = FlameConfig::default().to_toml();
        assert!(toml.contains("[bind]"));
        assert!(toml.contains("[show]"));
        assert!(toml.contains("[telemetry]"));
        assert!(toml.contains("osc_port = 6511"));
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let mut config = FlameConfig::default();
        config.show.fps = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
