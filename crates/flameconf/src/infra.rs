//! Infrastructure settings - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Network bind addresses and well-known ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindConfig {
    /// Address the OSC listener binds to.
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_osc_address")]
    pub osc_address: String,

    /// UDP port for OSC sensor and button input.
    /// Default: 6511
    #[serde(default = "BindConfig::default_osc_port")]
    pub osc_port: u16,

    /// HTTP port for pattern commands.
    /// Default: 6509
    #[serde(default = "BindConfig::default_command_port")]
    pub command_port: u16,

    /// UDP port the status report is broadcast to.
    /// Default: 6510
    #[serde(default = "BindConfig::default_status_port")]
    pub status_port: u16,

    /// UDP port on the nozzle controllers.
    /// Default: 6454
    #[serde(default = "BindConfig::default_artnet_port")]
    pub artnet_port: u16,
}

impl BindConfig {
    fn default_osc_address() -> String {
        "0.0.0.0".to_string()
    }

    fn default_osc_port() -> u16 {
        6511
    }

    fn default_command_port() -> u16 {
        6509
    }

    fn default_status_port() -> u16 {
        6510
    }

    fn default_artnet_port() -> u16 {
        6454
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            osc_address: Self::default_osc_address(),
            osc_port: Self::default_osc_port(),
            command_port: Self::default_command_port(),
            status_port: Self::default_status_port(),
            artnet_port: Self::default_artnet_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_defaults() {
        let bind = BindConfig::default();
        assert_eq!(bind.osc_address, "0.0.0.0");
        assert_eq!(bind.osc_port, 6511);
        assert_eq!(bind.command_port, 6509);
        assert_eq!(bind.status_port, 6510);
        assert_eq!(bind.artnet_port, 6454);
    }

    #[test]
    fn test_telemetry_defaults() {
        assert_eq!(TelemetryConfig::default().log_level, "info");
    }
}
