//! flameproto - Wire and message types for Flamatik
//!
//! Everything that crosses a boundary between Flamatik's execution units, or
//! between Flamatik and the outside world, is defined here:
//!
//! - **artnet**: the ArtNet-like DMX frame sent to the nozzle controllers
//! - **command**: pattern commands and playlist entries (HTTP JSON)
//! - **input**: sensor and button identifiers plus the OSC address table
//! - **status**: the periodic status broadcast
//!
//! ## Wire Format
//!
//! ```text
//! 0       8      10      12   13   14         16         18
//! ┌───────┬──────┬───────┬────┬────┬──────────┬──────────┬──────────────┐
//! │Art-Net│opcode│version│seq │phys│universe  │length    │payload       │
//! │ \0    │00 50 │00 14  │    │ 0  │(LE u16)  │(BE u16)  │(sol,ap)×n    │
//! └───────┴──────┴───────┴────┴────┴──────────┴──────────┴──────────────┘
//! ```
//!
//! The payload is a list of `(solenoid, aperture)` byte pairs in the
//! controller's local wiring order.

pub mod artnet;
pub mod command;
pub mod input;
pub mod status;

pub use artnet::{
    encode_dmx, DmxFrame, FrameError, NozzleSlot, ARTNET_PORT, HEADER_SIZE, MAX_SLOTS,
};
pub use command::{Command, CommandError, PlaylistEntry};
pub use input::{ButtonChannel, OscRoute, SensorKind, IMU_ARITY, SENSOR_ARITY};
pub use status::StatusReport;
