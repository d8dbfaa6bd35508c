//! Sculpture layout: nozzles, controllers, and aperture calibration.
//!
//! The layout file is JSON so it can be shared with the other show tools:
//!
//! ```json
//! {
//!   "nozzles": 30,
//!   "controllers": [
//!     { "name": "lower", "ip": "10.0.0.50", "nozzles": 10,
//!       "solenoid_map": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
//!       "aperture_map": [0, 1, 2, 3, 4, 5, 6, 7, 8, 9] }
//!   ],
//!   "aperture_calibration": { "0": [0, 200], "1": [10, 255] }
//! }
//! ```
//!
//! Parsing checks shape only. Whether map entries fall inside the nozzle
//! range is decided by the state store when the show starts.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

/// One physical controller board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    pub ip: IpAddr,

    /// Nozzles wired to this board
    #[serde(rename = "nozzles")]
    pub nozzle_count: usize,

    /// Wire position -> logical nozzle, for the solenoid byte
    pub solenoid_map: Vec<usize>,

    /// Wire position -> logical nozzle, for the aperture byte
    pub aperture_map: Vec<usize>,

    /// ArtNet universe, 0 unless the board is configured otherwise
    #[serde(default)]
    pub universe: u16,

    /// UDP port override for this board
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Linear aperture calibration for one nozzle.
///
/// A logical aperture `a` in `[0, 1]` goes out on the wire as
/// `floor(start + (stop - start) * a)`, clamped to a byte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Calibration {
    pub start: f64,
    pub stop: f64,
}

impl Calibration {
    /// Full servo range, used when a layout is built in code
    pub const FULL: Calibration = Calibration {
        start: 0.0,
        stop: 255.0,
    };

    pub fn new(start: f64, stop: f64) -> Self {
        Self { start, stop }
    }

    /// Wire byte for a logical aperture
    pub fn apply(&self, aperture: f32) -> u8 {
        let raw = (self.start + (self.stop - self.start) * aperture as f64).floor();
        if raw.is_nan() {
            return 0;
        }
        raw.clamp(0.0, 255.0) as u8
    }
}

impl From<(f64, f64)> for Calibration {
    fn from((start, stop): (f64, f64)) -> Self {
        Self { start, stop }
    }
}

impl From<Calibration> for (f64, f64) {
    fn from(c: Calibration) -> Self {
        (c.start, c.stop)
    }
}

/// Raw file shape; calibration keys are nozzle numbers as strings
#[derive(Debug, Deserialize)]
struct SculptureFile {
    nozzles: usize,
    controllers: Vec<ControllerConfig>,
    aperture_calibration: BTreeMap<String, Calibration>,
}

/// Validated layout
#[derive(Debug, Clone, PartialEq)]
pub struct SculptureConfig {
    /// Total logical nozzles
    pub nozzles: usize,
    pub controllers: Vec<ControllerConfig>,
    /// Indexed by logical nozzle
    pub calibration: Vec<Calibration>,
}

impl SculptureConfig {
    /// Load and check a layout file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse and check a layout from JSON text
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: SculptureFile =
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut calibration: Vec<Option<Calibration>> = vec![None; file.nozzles];
        for (key, cal) in file.aperture_calibration {
            let nozzle: usize = key.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("aperture_calibration key {key:?} is not a nozzle number"))
            })?;
            // Extra entries beyond the nozzle count are harmless
            if let Some(slot) = calibration.get_mut(nozzle) {
                *slot = Some(cal);
            }
        }

        let calibration = calibration
            .into_iter()
            .enumerate()
            .map(|(nozzle, cal)| {
                cal.ok_or_else(|| {
                    ConfigError::Invalid(format!("nozzle {nozzle} has no aperture_calibration entry"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self {
            nozzles: file.nozzles,
            controllers: file.controllers,
            calibration,
        };
        config.check_shape()?;
        Ok(config)
    }

    /// Uncalibrated layout, one contiguous block of nozzles per controller.
    /// Convenient for tests and bench setups.
    pub fn contiguous(controllers: &[(&str, IpAddr, usize)]) -> Self {
        let mut next = 0;
        let controllers: Vec<ControllerConfig> = controllers
            .iter()
            .map(|(name, ip, count)| {
                let map: Vec<usize> = (next..next + count).collect();
                next += count;
                ControllerConfig {
                    name: name.to_string(),
                    ip: *ip,
                    nozzle_count: *count,
                    solenoid_map: map.clone(),
                    aperture_map: map,
                    universe: 0,
                    port: None,
                }
            })
            .collect();

        Self {
            nozzles: next,
            controllers,
            calibration: vec![Calibration::FULL; next],
        }
    }

    fn check_shape(&self) -> Result<(), ConfigError> {
        if self.nozzles == 0 {
            return Err(ConfigError::Invalid("nozzles must be at least 1".to_string()));
        }
        if self.controllers.is_empty() {
            return Err(ConfigError::Invalid("no controllers configured".to_string()));
        }
        for c in &self.controllers {
            if c.solenoid_map.len() < c.nozzle_count {
                return Err(ConfigError::Invalid(format!(
                    "controller {}: solenoid_map has {} entries, needs {}",
                    c.name,
                    c.solenoid_map.len(),
                    c.nozzle_count
                )));
            }
            if c.aperture_map.len() < c.nozzle_count {
                return Err(ConfigError::Invalid(format!(
                    "controller {}: aperture_map has {} entries, needs {}",
                    c.name,
                    c.aperture_map.len(),
                    c.nozzle_count
                )));
            }
        }
        Ok(())
    }
}
