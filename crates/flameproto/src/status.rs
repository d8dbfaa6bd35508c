//! Status broadcast
//!
//! A compact JSON document broadcast a few times per second so control
//! surfaces can find the daemon and mirror what the sculpture is doing.
//! Nozzle state is expressed in logical nozzles, not controller wiring.

use serde::{Deserialize, Serialize};

pub const DEVICE_NAME: &str = "lightcurve";
pub const STATUS_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub device: String,
    pub version: String,
    pub command_port: u16,
    /// Seconds since the daemon started
    pub uptime: f64,
    pub solenoids: Vec<bool>,
    pub apertures: Vec<f32>,
    pub gyro: [f32; 3],
    pub rotation: [f32; 3],
    pub gravity: [f32; 3],
    /// Increments per report, lets receivers estimate loss
    pub seq: u64,
}

impl StatusReport {
    /// Round all floats to 3 decimals to keep the datagram small
    pub fn rounded(mut self) -> Self {
        self.uptime = round3_f64(self.uptime);
        for a in &mut self.apertures {
            *a = round3(*a);
        }
        for v in [&mut self.gyro, &mut self.rotation, &mut self.gravity] {
            for x in v.iter_mut() {
                *x = round3(*x);
            }
        }
        self
    }

    /// Serialize without whitespace
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn round3(x: f32) -> f32 {
    (x * 1000.0).round() / 1000.0
}

fn round3_f64(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> StatusReport {
        StatusReport {
            device: DEVICE_NAME.to_string(),
            version: STATUS_VERSION.to_string(),
            command_port: 6509,
            uptime: 12.345678,
            solenoids: vec![true, false],
            apertures: vec![0.123456, 1.0],
            gyro: [0.0001, 0.0, 0.0],
            rotation: [1.23456, 0.0, 0.0],
            gravity: [0.0, -9.80665, 0.0],
            seq: 3,
        }
    }

    #[test]
    fn test_rounding() {
        let r = report().rounded();
        assert_eq!(r.uptime, 12.346);
        assert_eq!(r.apertures[0], 0.123);
        assert_eq!(r.gyro[0], 0.0);
        assert_eq!(r.gravity[1], -9.807);
    }

    #[test]
    fn test_compact_json() {
        let bytes = report().rounded().to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(r#"{"device":"lightcurve","version":"1.0","command_port":6509"#));
        assert!(!text.contains(' '));
        assert!(text.contains(r#""solenoids":[true,false]"#));
    }
}
