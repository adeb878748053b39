//! Session configuration.
//!
//! A session is described by one JSON file listing the modalities of the
//! recording and the navigation settings. Relative modality directories are
//! resolved against the directory holding the configuration file.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

/// How the global end of the recording is chosen.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndPolicy {
    /// Recording lasts until the last modality ends; earlier endings become gaps.
    #[default]
    Longest,
    /// Recording stops when the first modality ends.
    Shortest,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModalityKind {
    Video,
    Signal,
    Audio,
}

/// Storage shape of a signal file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalShape {
    #[default]
    RegularVector,
    /// Two columns: timestamp (ms since file start) and value.
    TimestampedMatrix,
    /// Timestamp column followed by several value columns.
    MultiColumnTimestamped,
}

/// Where the start time of a file is read from in its name.
///
/// With `position` or `format` absent the default timestamp
/// (2000-01-01 00:00:00) is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimestampConfig {
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub position: Option<usize>,
    /// `posix`, `posix_s`, `posix_ms`, or a strftime-style pattern.
    #[serde(default)]
    pub format: Option<String>,
}

/// Frequency declared for a modality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FrequencySpec {
    /// Hz. `0` means irregular sampling, `-1` means same as the reference modality.
    Value(f64),
    /// Dotted path of an attribute inside the data file (e.g. `stream_info.nominal_srate`).
    Attribute(String),
}

impl FrequencySpec {
    pub const IRREGULAR: f64 = 0.0;
    pub const SAME_AS_REFERENCE: f64 = -1.0;
}

/// One camera or signal stream of the recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModalityConfig {
    pub id: String,
    pub kind: ModalityKind,
    pub directory: PathBuf,
    pub pattern: String,
    #[serde(default)]
    pub timestamp: TimestampConfig,
    /// Data-access key: text column, `stream[:channel]` for Zarr, `left`/`right` for audio.
    #[serde(default)]
    pub key: Option<String>,
    /// Missing means "read it from the file header".
    #[serde(default)]
    pub frequency: Option<FrequencySpec>,
    #[serde(default)]
    pub shape: SignalShape,
    #[serde(default = "default_true")]
    pub required: bool,
}

impl ModalityConfig {
    /// Frequency explicitly configured as `0`.
    pub fn declares_irregular(&self) -> bool {
        matches!(self.frequency, Some(FrequencySpec::Value(f)) if f == FrequencySpec::IRREGULAR)
    }
}

fn default_true() -> bool {
    true
}

/// Complete description of a recording session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_chunk_duration")]
    pub chunk_duration_secs: f64,
    #[serde(default)]
    pub end_policy: EndPolicy,
    /// Start-time drift absorbed without creating a gap.
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: f64,
    /// Offset applied to file name timestamps, e.g. `+01:00`. UTC when absent.
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Modality whose frequency defines cursor sample indices.
    #[serde(default)]
    pub reference_modality: Option<String>,
    #[serde(default = "default_window_duration")]
    pub window_duration_secs: f64,
    #[serde(default = "default_zoom_factor")]
    pub zoom_factor: f64,
    pub modalities: Vec<ModalityConfig>,
}

fn default_chunk_duration() -> f64 {
    1800.0
}

fn default_tolerance() -> f64 {
    1.0
}

fn default_window_duration() -> f64 {
    30.0
}

fn default_zoom_factor() -> f64 {
    2.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: default_chunk_duration(),
            end_policy: EndPolicy::default(),
            tolerance_secs: default_tolerance(),
            time_zone: None,
            reference_modality: None,
            window_duration_secs: default_window_duration(),
            zoom_factor: default_zoom_factor(),
            modalities: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Load a session file, resolving relative modality directories against its location.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let mut config: SessionConfig = serde_json::from_str(&contents)
            .map_err(|e| SyncError::InvalidConfig(format!("{}: {}", path.display(), e)))?;

        if let Some(base) = path.parent() {
            for modality in &mut config.modalities {
                if modality.directory.is_relative() {
                    modality.directory = base.join(&modality.directory);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| SyncError::io(path, e))
    }

    /// Check everything that can be checked without touching the data files.
    pub fn validate(&self) -> Result<()> {
        if !(self.chunk_duration_secs > 0.0) {
            return Err(SyncError::InvalidConfig(format!(
                "chunk_duration_secs must be positive, got {}",
                self.chunk_duration_secs
            )));
        }
        if !(self.tolerance_secs >= 0.0) {
            return Err(SyncError::InvalidConfig(format!(
                "tolerance_secs must be >= 0, got {}",
                self.tolerance_secs
            )));
        }
        if !(self.window_duration_secs > 0.0) {
            return Err(SyncError::InvalidConfig(format!(
                "window_duration_secs must be positive, got {}",
                self.window_duration_secs
            )));
        }
        if !(self.zoom_factor > 1.0) {
            return Err(SyncError::InvalidConfig(format!(
                "zoom_factor must be greater than 1, got {}",
                self.zoom_factor
            )));
        }
        if self.modalities.is_empty() {
            return Err(SyncError::InvalidConfig("no modality configured".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for modality in &self.modalities {
            if !seen.insert(modality.id.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate modality id '{}'",
                    modality.id
                )));
            }
            if let Some(FrequencySpec::Value(f)) = modality.frequency {
                if f < 0.0 && f != FrequencySpec::SAME_AS_REFERENCE {
                    return Err(SyncError::InvalidConfig(format!(
                        "modality '{}': negative frequency {}",
                        modality.id, f
                    )));
                }
            }
        }

        if let Some(reference) = &self.reference_modality {
            if !self.modalities.iter().any(|m| &m.id == reference) {
                return Err(SyncError::InvalidConfig(format!(
                    "reference modality '{}' is not configured",
                    reference
                )));
            }
        }

        self.time_zone_offset()?;
        Ok(())
    }

    /// Offset used to interpret file name timestamps.
    pub fn time_zone_offset(&self) -> Result<FixedOffset> {
        match self.time_zone.as_deref() {
            None => Ok(utc_offset()),
            Some(tz) => crate::timestamp::parse_offset(tz),
        }
    }

    pub fn modality(&self, id: &str) -> Option<&ModalityConfig> {
        self.modalities.iter().find(|m| m.id == id)
    }
}

pub fn utc_offset() -> FixedOffset {
    Utc.fix()
}
