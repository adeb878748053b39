use ndarray::{Array2, Ix1, Ix2};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::storage::{ReadableStorageTraits, StoreKey};

use super::{ModalityReader, ProbeInfo, ReaderKind, SampleRate, TimedSamples, WindowData, check_window};
use crate::error::{Result, SyncError};

/// One stream of a Zarr store in the recorder layout:
///
/// ```text
/// recording.zarr/
/// └── <stream>/
///     ├── data   [channels, samples]
///     ├── time   [samples] seconds
///     └── zarr.json (attributes: stream_info.nominal_srate, ...)
/// ```
///
/// `key` is `stream` or `stream:channel`; without a key the first stream in
/// the store is used with all its channels.
pub struct ZarrSignalReader {
    path: PathBuf,
    kind: ReaderKind,
    store: Arc<FilesystemStore>,
    stream: String,
    channel: Option<u64>,
    data: Array<FilesystemStore>,
    time: Option<Array<FilesystemStore>>,
    times: Option<Vec<f64>>,
    probe: Option<ProbeInfo>,
}

impl ZarrSignalReader {
    pub fn open(path: &Path, kind: ReaderKind, key: Option<&str>) -> Result<Self> {
        let store = Arc::new(FilesystemStore::new(path).map_err(|e| SyncError::decode(path, e))?);

        let (stream, channel) = match key {
            Some(k) => match k.split_once(':') {
                Some((s, c)) => {
                    let channel = c.trim().parse::<u64>().map_err(|_| {
                        SyncError::InvalidConfig(format!("channel in key '{}' is not an index", k))
                    })?;
                    (s.to_string(), Some(channel))
                }
                None => (k.to_string(), None),
            },
            None => (first_stream(path)?, None),
        };

        let data_path = format!("/{}/data", stream);
        let data = Array::<FilesystemStore>::open(store.clone(), &data_path)
            .map_err(|e| SyncError::decode(path, format!("{}: {}", data_path, e)))?;

        let time_path = format!("/{}/time", stream);
        let time = Array::<FilesystemStore>::open(store.clone(), &time_path).ok();
        if kind.is_irregular() && time.is_none() {
            return Err(SyncError::decode(path, format!("missing {}", time_path)));
        }

        if let Some(c) = channel {
            let channels = data.shape()[0];
            if c >= channels {
                return Err(SyncError::InvalidConfig(format!(
                    "channel {} requested but {} has {} channels",
                    c, stream, channels
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            store,
            stream,
            channel,
            data,
            time,
            times: None,
            probe: None,
        })
    }

    fn channel_range(&self) -> (u64, u64) {
        match self.channel {
            Some(c) => (c, 1),
            None => (0, self.data.shape()[0]),
        }
    }

    fn stream_attributes(&self) -> Result<serde_json::Value> {
        read_group_attributes(&self.store, &format!("/{}", self.stream))
            .map_err(|e| SyncError::decode(&self.path, e))
    }

    /// Timestamps relative to the first sample.
    fn relative_times(&mut self) -> Result<&[f64]> {
        if self.times.is_none() {
            let time = self
                .time
                .as_ref()
                .ok_or_else(|| SyncError::decode(&self.path, "stream has no time array"))?;
            let n = time.shape()[0];
            let values = if n == 0 {
                Vec::new()
            } else {
                let subset = ArraySubset::new_with_start_shape(vec![0], vec![n])
                    .map_err(|e| SyncError::decode(&self.path, e))?;
                let arr = time
                    .retrieve_array_subset_ndarray::<f64>(&subset)
                    .map_err(|e| SyncError::decode(&self.path, e))?
                    .into_dimensionality::<Ix1>()
                    .map_err(|e| SyncError::decode(&self.path, e))?;
                let t0 = arr[0];
                arr.iter().map(|t| t - t0).collect()
            };
            self.times = Some(values);
        }
        Ok(self.times.as_deref().unwrap_or(&[]))
    }

    fn read_rows(&self, start: u64, length: u64) -> Result<Array2<f64>> {
        let (c0, nch) = self.channel_range();
        if length == 0 {
            return Ok(Array2::zeros((0, nch as usize)));
        }
        let subset = ArraySubset::new_with_start_shape(vec![c0, start], vec![nch, length])
            .map_err(|e| SyncError::decode(&self.path, e))?;

        macro_rules! retrieve_as_f64 {
            ($ty:ty) => {
                self.data
                    .retrieve_array_subset_ndarray::<$ty>(&subset)
                    .map_err(|e| SyncError::decode(&self.path, e))?
                    .mapv(|v| v as f64)
            };
        }

        let block = match self.data.data_type() {
            DataType::Float64 => retrieve_as_f64!(f64),
            DataType::Float32 => retrieve_as_f64!(f32),
            DataType::Int32 => retrieve_as_f64!(i32),
            DataType::Int16 => retrieve_as_f64!(i16),
            DataType::Int8 => retrieve_as_f64!(i8),
            other => {
                return Err(SyncError::unsupported(
                    &self.path,
                    format!("data type {:?} is not numeric", other),
                ));
            }
        };

        // stored [channels, samples], returned [samples, channels]
        let block = block
            .into_dimensionality::<Ix2>()
            .map_err(|e| SyncError::decode(&self.path, e))?;
        Ok(block.reversed_axes().as_standard_layout().to_owned())
    }
}

impl ModalityReader for ZarrSignalReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn probe(&mut self) -> Result<ProbeInfo> {
        if let Some(info) = &self.probe {
            return Ok(info.clone());
        }

        let sample_count = self.data.shape()[1];
        let channels = self.channel_range().1 as usize;
        let nominal = self
            .stream_attributes()
            .ok()
            .and_then(|attrs| lookup_number(&attrs, "stream_info.nominal_srate"))
            .unwrap_or(0.0);

        let info = if self.kind.is_irregular() {
            let duration = self.relative_times()?.last().copied().unwrap_or(0.0);
            ProbeInfo {
                sample_count,
                rate: SampleRate::Irregular,
                channels,
                duration_hint: Some(duration),
            }
        } else {
            ProbeInfo {
                sample_count,
                rate: if nominal > 0.0 {
                    SampleRate::Regular(nominal)
                } else {
                    SampleRate::Unknown
                },
                channels,
                duration_hint: None,
            }
        };
        self.probe = Some(info.clone());
        Ok(info)
    }

    fn read_window(&mut self, start: u64, length: u64) -> Result<WindowData> {
        check_window(&self.path, start, length, self.data.shape()[1])?;
        Ok(WindowData::Signal(self.read_rows(start, length)?))
    }

    fn read_window_by_time(&mut self, start: f64, end: f64) -> Result<TimedSamples> {
        if !self.kind.is_irregular() {
            let frequency = match self.probe()?.rate {
                SampleRate::Regular(f) => f,
                _ => {
                    return Err(SyncError::unsupported(
                        &self.path,
                        "stream has no nominal rate",
                    ));
                }
            };
            let n = self.data.shape()[1];
            let first = ((start.max(0.0) * frequency).ceil() as u64).min(n);
            let last = ((end.max(0.0) * frequency).ceil() as u64).min(n);
            let values = self.read_rows(first, last.saturating_sub(first))?;
            let times = (first..last.max(first)).map(|i| i as f64 / frequency).collect();
            return Ok(TimedSamples { times, values });
        }

        let times = self.relative_times()?;
        let first = times.partition_point(|t| *t < start);
        let last = times.partition_point(|t| *t < end);
        if last <= first {
            return Ok(TimedSamples::empty(self.channel_range().1 as usize));
        }
        let selected = times[first..last].to_vec();
        let values = self.read_rows(first as u64, (last - first) as u64)?;
        Ok(TimedSamples {
            times: selected,
            values,
        })
    }

    fn attribute(&mut self, name: &str) -> Result<f64> {
        let attrs = self.stream_attributes()?;
        lookup_number(&attrs, name).ok_or_else(|| {
            SyncError::decode(&self.path, format!("no numeric attribute '{}' on /{}", name, self.stream))
        })
    }
}

/// Read attributes from a group's zarr.json file (Zarr v3 format)
pub fn read_group_attributes(
    store: &Arc<FilesystemStore>,
    path: &str,
) -> std::result::Result<serde_json::Value, String> {
    let trimmed_path = path.trim_end_matches('/').trim_start_matches('/');
    let zarr_json_path = if trimmed_path.is_empty() {
        "zarr.json".to_string()
    } else {
        format!("{}/zarr.json", trimmed_path)
    };
    let zarr_key = StoreKey::new(&zarr_json_path).map_err(|e| e.to_string())?;
    let zarr_bytes = store
        .get(&zarr_key)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("metadata not found at {}", zarr_json_path))?;
    let zarr_metadata: serde_json::Value =
        serde_json::from_slice(&zarr_bytes).map_err(|e| e.to_string())?;

    Ok(zarr_metadata
        .get("attributes")
        .cloned()
        .unwrap_or_else(|| json!({})))
}

/// Follow a dotted path (`stream_info.nominal_srate`) to a number.
/// Numbers stored as strings are accepted.
fn lookup_number(value: &serde_json::Value, dotted: &str) -> Option<f64> {
    let target = dotted
        .split('.')
        .filter(|part| !part.is_empty())
        .try_fold(value, |node, part| node.get(part))?;
    target
        .as_f64()
        .or_else(|| target.as_str().and_then(|s| s.trim().parse().ok()))
}

/// First stream group (alphabetically) holding a `data` array.
fn first_stream(path: &Path) -> Result<String> {
    let entries = std::fs::read_dir(path).map_err(|e| SyncError::io(path, e))?;
    let mut streams: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join("data").join("zarr.json").exists())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    streams.sort();
    streams
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::decode(path, "no stream group with a data array"))
}
