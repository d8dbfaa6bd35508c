//! Playlist resolution
//!
//! A playlist is either a JSON file of entries, each naming a registered
//! pattern and a duration, or a single entry built from the command line.
//! Either way it is checked against the registry before the show starts.

use std::path::{Path, PathBuf};

use flameproto::{CommandError, PlaylistEntry};
use serde_json::Value;
use thiserror::Error;

use crate::pattern::PatternRegistry;

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("failed to read playlist {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse playlist {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("playlist is empty")]
    Empty,

    #[error("playlist entry {index} has no name")]
    MissingName { index: usize },

    #[error("playlist entry {index}: {name} is not a registered pattern")]
    UnknownPattern { index: usize, name: String },

    #[error("playlist entry {index} ({name}) has no duration")]
    MissingDuration { index: usize, name: String },

    #[error("playlist entry {index}: {source}")]
    OutOfRange {
        index: usize,
        #[source]
        source: CommandError,
    },
}

/// A validated, non-empty list of entries
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
}

impl Playlist {
    /// Load and validate a playlist file
    pub fn load(path: &Path, registry: &PatternRegistry) -> Result<Self, PlaylistError> {
        let contents = std::fs::read_to_string(path).map_err(|source| PlaylistError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path, registry)
    }

    /// Validate file contents. Every entry needs a registered name and a
    /// duration; the first offending entry is reported by index.
    pub fn parse(contents: &str, path: &Path, registry: &PatternRegistry) -> Result<Self, PlaylistError> {
        let parse_error = |message: String| PlaylistError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let raw: Vec<Value> = serde_json::from_str(contents).map_err(|e| parse_error(e.to_string()))?;
        if raw.is_empty() {
            return Err(PlaylistError::Empty);
        }

        let mut entries = Vec::with_capacity(raw.len());
        for (index, value) in raw.into_iter().enumerate() {
            let Some(name) = value.get("name").and_then(Value::as_str).map(str::to_string) else {
                return Err(PlaylistError::MissingName { index });
            };
            if !registry.contains(&name) {
                return Err(PlaylistError::UnknownPattern { index, name });
            }
            if value.get("duration").is_none_or(Value::is_null) {
                return Err(PlaylistError::MissingDuration { index, name });
            }

            let entry: PlaylistEntry = serde_json::from_value(value)
                .map_err(|e| parse_error(format!("entry {index}: {e}")))?;
            entry
                .check()
                .map_err(|source| PlaylistError::OutOfRange { index, source })?;
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// A one-entry playlist, as from the command line or a `setPattern`.
    /// No duration is required.
    pub fn single(entry: PlaylistEntry, registry: &PatternRegistry) -> Result<Self, PlaylistError> {
        if !registry.contains(&entry.name) {
            return Err(PlaylistError::UnknownPattern {
                index: 0,
                name: entry.name,
            });
        }
        entry
            .check()
            .map_err(|source| PlaylistError::OutOfRange { index: 0, source })?;
        Ok(Self { entries: vec![entry] })
    }

    /// A file playlist if one is given, else the single entry
    pub fn resolve(
        list: Option<&Path>,
        entry: PlaylistEntry,
        registry: &PatternRegistry,
    ) -> Result<Self, PlaylistError> {
        match list {
            Some(path) => Self::load(path, registry),
            None => Self::single(entry, registry),
        }
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`, wrapping around
    pub fn get(&self, index: usize) -> &PlaylistEntry {
        &self.entries[index % self.entries.len()]
    }
}
