//! Settings file discovery, layered merge, and environment variable overlay.

use crate::{ConfigError, FlameConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover settings files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli). Only returns files
/// that exist.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/flamatik/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("flamatik/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("flamatik.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one settings file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, key by key. Nested tables merge recursively,
/// any other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into settings, filling gaps with defaults.
pub fn from_table(table: toml::Table, path: &Path) -> Result<FlameConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Parse settings from a TOML string.
pub fn parse_toml(contents: &str, path: &Path) -> Result<FlameConfig, ConfigError> {
    let table = contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    from_table(table, path)
}

/// Apply environment variable overrides to settings.
pub fn apply_env_overrides(config: &mut FlameConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Same as [`apply_env_overrides`] but reads variables through `lookup`.
pub fn apply_overrides_from(
    config: &mut FlameConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup("FLAMATIK_FPS") {
        if let Ok(fps) = v.parse() {
            config.show.fps = fps;
            sources.env_overrides.push("FLAMATIK_FPS".to_string());
        }
    }
    if lookup("FLAMATIK_NOBUTTONS").is_some() {
        config.show.buttons = false;
        sources.env_overrides.push("FLAMATIK_NOBUTTONS".to_string());
    }
    if let Some(v) = lookup("FLAMATIK_BROADCAST") {
        config.show.broadcast = v;
        sources.env_overrides.push("FLAMATIK_BROADCAST".to_string());
    }

    if let Some(v) = lookup("FLAMATIK_OSC_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.osc_port = port;
            sources.env_overrides.push("FLAMATIK_OSC_PORT".to_string());
        }
    }
    if let Some(v) = lookup("FLAMATIK_COMMAND_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.command_port = port;
            sources.env_overrides.push("FLAMATIK_COMMAND_PORT".to_string());
        }
    }
    if let Some(v) = lookup("FLAMATIK_STATUS_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.status_port = port;
            sources.env_overrides.push("FLAMATIK_STATUS_PORT".to_string());
        }
    }

    if let Some(v) = lookup("FLAMATIK_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("FLAMATIK_LOG_LEVEL".to_string());
    }
}
