//! Pattern commands and playlist entries
//!
//! Commands arrive as JSON over HTTP and are queued for the pattern
//! scheduler. The same `PlaylistEntry` record describes one item of a
//! playlist file and the payload of a `setPattern` command.

use serde::{Deserialize, Serialize};

/// One pattern invocation: which routine, for how long, with what parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaylistEntry {
    /// Registered pattern name
    pub name: String,

    /// Seconds before the scheduler stops the pattern.
    /// `None` lets the pattern run until it returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// First nozzle the pattern should address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nozzle: Option<usize>,

    /// Pattern-specific delay in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,

    /// Pattern-specific group size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<usize>,

    /// Number of repetitions for looping patterns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<u32>,
}

impl PlaylistEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Reject negative or non-finite `duration` and `delay`
    pub fn check(&self) -> Result<(), CommandError> {
        for (field, value) in [("duration", self.duration), ("delay", self.delay)] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(CommandError::OutOfRange { field, value });
                }
            }
        }
        Ok(())
    }
}

/// A request for the pattern scheduler
///
/// ```json
/// {"command": "setPattern", "name": "poof", "nozzle": 3}
/// {"command": "resetPattern"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    /// Replace the playlist with this single entry and start it now
    SetPattern(PlaylistEntry),
    /// Go back to the playlist the daemon was started with
    ResetPattern,
}

/// Command decoding errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid command: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("{field} must be a non-negative number of seconds, got {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

impl Command {
    /// Decode a command from a JSON body
    pub fn parse(body: &[u8]) -> Result<Self, CommandError> {
        let command: Self = serde_json::from_slice(body)?;
        if let Command::SetPattern(entry) = &command {
            entry.check()?;
        }
        Ok(command)
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Command::SetPattern(_) => "setPattern",
            Command::ResetPattern => "resetPattern",
        }
    }
}
