//! JSON persistence for the capture schedule
//!
//! Loading never fails: a missing file yields defaults and an unreadable or
//! corrupt one is logged and replaced by defaults. Saving merges a partial
//! update into the current schedule and writes the result atomically.

use crate::schedule::{ScheduleConfig, SettingsUpdate, ValidationError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Error type for settings store operations
#[derive(Debug)]
pub enum StoreError {
    /// Settings file could not be read or written
    Io(io::Error),
    /// Settings file exists but does not hold a valid schedule
    Corrupt(serde_json::Error),
    /// Update carries values the schedule must never hold
    Invalid(ValidationError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Settings file IO error: {}", e),
            StoreError::Corrupt(e) => write!(f, "Settings file is corrupt: {}", e),
            StoreError::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e)
    }
}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::Invalid(e)
    }
}

/// Settings file on disk
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the schedule, falling back to defaults when the file is missing or corrupt
    pub fn load(&self) -> ScheduleConfig {
        let mut config = match self.try_load() {
            Ok(Some(config)) => config,
            Ok(None) => {
                info!(path = %self.path.display(), "No settings file, using defaults");
                ScheduleConfig::default()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable settings file, using defaults"
                );
                ScheduleConfig::default()
            }
        };

        for fix in config.sanitize() {
            warn!(path = %self.path.display(), "Settings file: {}", fix);
        }
        for (index, window) in config.unreachable_windows() {
            warn!(
                index,
                window = %window,
                "Special window crosses midnight and will never match; split it into two windows"
            );
        }

        config
    }

    /// Read the schedule, returning `Ok(None)` if the file does not exist
    pub fn try_load(&self) -> Result<Option<ScheduleConfig>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config = serde_json::from_str(&content)?;
        Ok(Some(config))
    }

    /// Merge `update` into `current`, persist the result and return it
    ///
    /// Nothing is written when the update fails validation.
    pub fn save(
        &self,
        current: &ScheduleConfig,
        update: &SettingsUpdate,
    ) -> Result<ScheduleConfig, StoreError> {
        update.validate(current)?;
        let merged = current.merged(update);
        self.write(&merged)?;
        Ok(merged)
    }

    /// Write the whole schedule, replacing the file atomically
    pub fn write(&self, config: &ScheduleConfig) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(config)?;
        let temp = temp_path(&self.path);
        fs::write(&temp, json)?;
        if let Err(e) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Sibling path the new contents are staged in before the rename
fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}
