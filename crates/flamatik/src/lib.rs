//! Flamatik: realtime fire-art controller
//!
//! Drives a sculpture of flame nozzles. Each nozzle has a solenoid (fire on
//! or off) and a proportional aperture valve, reached through ArtNet
//! controllers on the local network.
//!
//! Units, each on its own thread or task:
//!
//! - **transmitter**: copies [`StateStore`] every frame and sends one ArtNet
//!   datagram per controller; runs the button fail-safe; closes every valve
//!   on the way out, whatever the exit path
//! - **scheduler**: walks the playlist, one pattern thread at a time, and
//!   applies commands from the HTTP listener
//! - **ingest**: OSC sensors and buttons in, HTTP commands in
//! - **status**: periodic JSON broadcast for control surfaces
//!
//! The [`StateStore`] is the only thing shared between units and hands out
//! copies only.

pub mod daemon;
pub mod failsafe;
pub mod ingest;
pub mod pattern;
pub mod patterns;
pub mod playlist;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod telemetry;
pub mod transmitter;

pub use daemon::{shutdown_signal, Daemon, DaemonConfig};
pub use failsafe::{FailSafeMonitor, BUTTON_TIMEOUT};
pub use pattern::{
    PatternContext, PatternError, PatternFn, PatternHandle, PatternParams, PatternRegistry,
    JOIN_GRACE,
};
pub use playlist::{Playlist, PlaylistError};
pub use scheduler::{Scheduler, SchedulerHandle, TICK};
pub use state::{ButtonState, OutputSnapshot, SensorState, StateError, StateStore};
pub use transmitter::{
    encode_payload, CaptureSink, CapturedFrame, ControllerRoute, FrameSink, TransmitError,
    TransmitStats, Transmitter, TransmitterConfig, TransmitterHandle, UdpFrameSink,
};
