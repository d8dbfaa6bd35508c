//! Sensor and button inputs
//!
//! Control surfaces (a phone IMU app, a button grid) send OSC messages to
//! Flamatik. This module names the inputs and maps OSC addresses onto them;
//! decoding the OSC datagram itself happens at the listener.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of floats in every sensor vector
pub const SENSOR_ARITY: usize = 3;

/// Number of values in a combined `/LC/imu` message:
/// millis, rotation×3, gravity×3, gyro×3
pub const IMU_ARITY: usize = 10;

/// One of the three orientation vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Rotational speed around pitch, yaw, roll
    Gyro,
    /// Absolute rotation against a fixed reference frame
    Rotation,
    /// Direction in which gravity currently points
    Gravity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [SensorKind::Gyro, SensorKind::Rotation, SensorKind::Gravity];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Gyro => "gyro",
            SensorKind::Rotation => "rotation",
            SensorKind::Gravity => "gravity",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two independent manual button channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonChannel {
    Primary,
    Secondary,
}

impl ButtonChannel {
    pub const ALL: [ButtonChannel; 2] = [ButtonChannel::Primary, ButtonChannel::Secondary];

    pub fn index(&self) -> usize {
        match self {
            ButtonChannel::Primary => 0,
            ButtonChannel::Secondary => 1,
        }
    }
}

impl fmt::Display for ButtonChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonChannel::Primary => f.write_str("primary"),
            ButtonChannel::Secondary => f.write_str("secondary"),
        }
    }
}

/// Where an OSC message should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscRoute {
    Sensor(SensorKind),
    Imu,
    Buttons(ButtonChannel),
}

impl OscRoute {
    /// Look up an OSC address
    pub fn from_address(addr: &str) -> Option<Self> {
        match addr {
            "/LC/gyro" => Some(OscRoute::Sensor(SensorKind::Gyro)),
            "/LC/rotation" => Some(OscRoute::Sensor(SensorKind::Rotation)),
            "/LC/gravity" => Some(OscRoute::Sensor(SensorKind::Gravity)),
            "/LC/imu" => Some(OscRoute::Imu),
            "/LC/nozzles" => Some(OscRoute::Buttons(ButtonChannel::Primary)),
            "/LC/nozzles/1" => Some(OscRoute::Buttons(ButtonChannel::Secondary)),
            _ => None,
        }
    }

    pub fn address(&self) -> &'static str {
        match self {
            OscRoute::Sensor(SensorKind::Gyro) => "/LC/gyro",
            OscRoute::Sensor(SensorKind::Rotation) => "/LC/rotation",
            OscRoute::Sensor(SensorKind::Gravity) => "/LC/gravity",
            OscRoute::Imu => "/LC/imu",
            OscRoute::Buttons(ButtonChannel::Primary) => "/LC/nozzles",
            OscRoute::Buttons(ButtonChannel::Secondary) => "/LC/nozzles/1",
        }
    }
}
