//! Show settings - frame rates and input handling.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowConfig {
    /// Frames per second sent to the controllers.
    /// Default: 15
    #[serde(default = "ShowConfig::default_fps")]
    pub fps: u32,

    /// Honor manual button input. `false` is the `--nobuttons` mode.
    /// Default: true
    #[serde(default = "ShowConfig::default_buttons")]
    pub buttons: bool,

    /// Length of each button channel.
    /// Default: 30
    #[serde(default = "ShowConfig::default_button_count")]
    pub button_count: usize,

    /// Broadcast address for the status report.
    /// Default: 255.255.255.255
    #[serde(default = "ShowConfig::default_broadcast")]
    pub broadcast: String,

    /// Status reports per second. Kept low to avoid network thrash.
    /// Default: 5
    #[serde(default = "ShowConfig::default_status_fps")]
    pub status_fps: u32,

    /// Repeat count handed to patterns that don't specify one.
    /// Default: 9999
    #[serde(default = "ShowConfig::default_repeat")]
    pub default_repeat: u32,
}

impl ShowConfig {
    fn default_fps() -> u32 {
        15
    }

    fn default_buttons() -> bool {
        true
    }

    fn default_button_count() -> usize {
        30
    }

    fn default_broadcast() -> String {
        "255.255.255.255".to_string()
    }

    fn default_status_fps() -> u32 {
        5
    }

    fn default_repeat() -> u32 {
        9999
    }
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            fps: Self::default_fps(),
            buttons: Self::default_buttons(),
            button_count: Self::default_button_count(),
            broadcast: Self::default_broadcast(),
            status_fps: Self::default_status_fps(),
            default_repeat: Self::default_repeat(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_defaults() {
        let show = ShowConfig::default();
        assert_eq!(show.fps, 15);
        assert!(show.buttons);
        assert_eq!(show.button_count, 30);
        assert_eq!(show.broadcast, "255.255.255.255");
        assert_eq!(show.status_fps, 5);
        assert_eq!(show.default_repeat, 9999);
    }
}
