//! Input boundary
//!
//! Listeners only write sensors and buttons through the store's value-copy
//! accessors, or queue commands for the scheduler. They never touch outputs.

pub mod http;
pub mod osc;

pub use http::{CommandListener, CommandState, Health};
pub use osc::{OscListener, OscStats};
