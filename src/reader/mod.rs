//! Uniform read access to one physical data file.
//!
//! Readers are opened per file and hold the file handle until dropped, so a
//! chunk load acquires handles for the files it touches and releases them all
//! when the load result (or an abandoned load) goes out of scope.

pub mod audio;
pub mod text;
pub mod video;
pub mod zarr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{ModalityConfig, ModalityKind, SignalShape};
use crate::error::{Result, SyncError};

/// Sampling regularity reported by a header probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleRate {
    Regular(f64),
    Irregular,
    /// The file does not carry its rate (plain text vectors); it must be configured.
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeInfo {
    pub sample_count: u64,
    pub rate: SampleRate,
    pub channels: usize,
    /// Seconds covered by irregular data (last timestamp relative to file start).
    pub duration_hint: Option<f64>,
}

/// Handle on one video frame. Decoding is left to the display side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRef {
    pub path: PathBuf,
    pub frame_index: u64,
}

/// Result of a sample-index read.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowData {
    /// `[samples, channels]`
    Signal(Array2<f64>),
    Frames(Vec<FrameRef>),
}

impl WindowData {
    pub fn len(&self) -> usize {
        match self {
            WindowData::Signal(values) => values.nrows(),
            WindowData::Frames(frames) => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a time-range read. Times are seconds since the file start.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSamples {
    pub times: Vec<f64>,
    /// `[rows, channels]`
    pub values: Array2<f64>,
}

impl TimedSamples {
    pub fn empty(channels: usize) -> Self {
        Self {
            times: Vec::new(),
            values: Array2::zeros((0, channels)),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Capability set shared by every storage shape.
pub trait ModalityReader: Send {
    fn path(&self) -> &Path;

    /// Sample count, rate and channels, without loading the payload.
    fn probe(&mut self) -> Result<ProbeInfo>;

    /// Exactly `length` samples starting at `start`.
    ///
    /// Fails with [`SyncError::OutOfRange`] when the window exceeds the file;
    /// callers clamp first.
    fn read_window(&mut self, start: u64, length: u64) -> Result<WindowData>;

    /// All samples whose time falls in `[start, end)` seconds since file start.
    /// An empty result is not an error.
    fn read_window_by_time(&mut self, start: f64, end: f64) -> Result<TimedSamples> {
        let info = self.probe()?;
        let SampleRate::Regular(frequency) = info.rate else {
            return Err(SyncError::unsupported(
                self.path(),
                "time-range reads need a known sampling rate",
            ));
        };
        let first = ((start.max(0.0) * frequency).ceil() as u64).min(info.sample_count);
        let last = ((end.max(0.0) * frequency).ceil() as u64).min(info.sample_count);
        if last <= first {
            return Ok(TimedSamples::empty(info.channels));
        }

        let times = (first..last).map(|i| i as f64 / frequency).collect();
        match self.read_window(first, last - first)? {
            WindowData::Signal(values) => Ok(TimedSamples { times, values }),
            WindowData::Frames(_) => Err(SyncError::unsupported(
                self.path(),
                "frames cannot be returned as timed samples",
            )),
        }
    }

    /// Raw (still encoded) bytes of one frame.
    fn read_frame_bytes(&mut self, frame_index: u64) -> Result<Vec<u8>> {
        let _ = frame_index;
        Err(SyncError::unsupported(self.path(), "no frame access for this format"))
    }

    /// Numeric attribute stored in the file, addressed by a dotted path.
    fn attribute(&mut self, name: &str) -> Result<f64> {
        Err(SyncError::unsupported(
            self.path(),
            format!("no attribute '{}' in this format", name),
        ))
    }
}

/// Storage shapes a modality can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderKind {
    RegularVector,
    TimestampedMatrix,
    MultiColumnTimestamped,
    VideoContainer,
    AudioContainer,
}

impl ReaderKind {
    pub fn for_modality(config: &ModalityConfig) -> Self {
        match config.kind {
            ModalityKind::Video => ReaderKind::VideoContainer,
            ModalityKind::Audio => ReaderKind::AudioContainer,
            ModalityKind::Signal => match config.shape {
                SignalShape::TimestampedMatrix => ReaderKind::TimestampedMatrix,
                SignalShape::MultiColumnTimestamped => ReaderKind::MultiColumnTimestamped,
                SignalShape::RegularVector if config.declares_irregular() => {
                    ReaderKind::TimestampedMatrix
                }
                SignalShape::RegularVector => ReaderKind::RegularVector,
            },
        }
    }

    pub fn is_irregular(self) -> bool {
        matches!(
            self,
            ReaderKind::TimestampedMatrix | ReaderKind::MultiColumnTimestamped
        )
    }
}

/// On-disk container, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    Text,
    Zarr,
    Wav,
    Mp4,
}

impl StorageFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "csv" | "dat" | "tsv" => Some(StorageFormat::Text),
            "zarr" => Some(StorageFormat::Zarr),
            "wav" => Some(StorageFormat::Wav),
            "mp4" | "m4v" | "mov" => Some(StorageFormat::Mp4),
            _ => None,
        }
    }
}

/// Open the reader matching `kind` and the file's container.
pub fn open_reader(path: &Path, kind: ReaderKind, key: Option<&str>) -> Result<Box<dyn ModalityReader>> {
    let format = StorageFormat::from_path(path)
        .ok_or_else(|| SyncError::unsupported(path, "unknown file extension"))?;

    let reader: Box<dyn ModalityReader> = match (kind, format) {
        (ReaderKind::VideoContainer, StorageFormat::Mp4) => Box::new(video::Mp4VideoReader::open(path)?),
        (ReaderKind::AudioContainer, StorageFormat::Wav) => Box::new(audio::WavAudioReader::open(path, key)?),
        (
            ReaderKind::RegularVector | ReaderKind::TimestampedMatrix | ReaderKind::MultiColumnTimestamped,
            StorageFormat::Text,
        ) => Box::new(text::TextSignalReader::open(path, kind, key)?),
        (
            ReaderKind::RegularVector | ReaderKind::TimestampedMatrix | ReaderKind::MultiColumnTimestamped,
            StorageFormat::Zarr,
        ) => Box::new(zarr::ZarrSignalReader::open(path, kind, key)?),
        (kind, format) => {
            return Err(SyncError::unsupported(
                path,
                format!("{:?} cannot be read as {:?}", format, kind),
            ));
        }
    };
    Ok(reader)
}

/// Precondition shared by every `read_window` implementation.
pub(crate) fn check_window(path: &Path, start: u64, length: u64, sample_count: u64) -> Result<()> {
    match start.checked_add(length) {
        Some(end) if end <= sample_count => Ok(()),
        _ => Err(SyncError::OutOfRange {
            path: path.to_path_buf(),
            start,
            length,
            sample_count,
        }),
    }
}
