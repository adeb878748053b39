use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors produced while cataloging, planning and reading a long recording.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad delimiter/position/format for a filename timestamp. The file is
    /// excluded from its catalog, the session goes on.
    #[error("cannot resolve start time of {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    /// One or more required modalities have zero usable files.
    #[error("no usable files for modality: {}", .0.join(", "))]
    NoData(Vec<String>),

    /// A reader was asked for samples beyond the end of its file.
    #[error(
        "window [{start}, {}) exceeds the {sample_count} samples of {path}",
        start + length
    )]
    OutOfRange {
        path: PathBuf,
        start: u64,
        length: u64,
        sample_count: u64,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported format for {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// A container/array library failed to decode the file.
    #[error("cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The recording span collapsed to nothing (e.g. shortest-end policy with
    /// a modality ending before the global start).
    #[error("recording span is empty: {0}")]
    EmptySpan(String),
}

impl SyncError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn decode(path: &Path, message: impl std::fmt::Display) -> Self {
        SyncError::Decode {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn unsupported(path: &Path, reason: impl Into<String>) -> Self {
        SyncError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Errors that only degrade one modality of one chunk to a gap.
    pub fn is_recoverable_read_error(&self) -> bool {
        matches!(
            self,
            SyncError::Io { .. } | SyncError::Decode { .. } | SyncError::UnsupportedFormat { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
