use hound::{SampleFormat, WavReader};
use ndarray::Array2;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{ModalityReader, ProbeInfo, SampleRate, WindowData, check_window};
use crate::error::{Result, SyncError};

/// One channel of a WAV file.
///
/// A key containing `right` (any case) selects the right channel, anything
/// else the left one. Integer samples are scaled to [-1, 1].
pub struct WavAudioReader {
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
    channel: usize,
}

impl WavAudioReader {
    pub fn open(path: &Path, key: Option<&str>) -> Result<Self> {
        let reader = WavReader::open(path).map_err(|e| wav_error(path, e))?;
        let channels = reader.spec().channels as usize;
        let wants_right = key
            .map(|k| k.to_ascii_lowercase().contains("right"))
            .unwrap_or(false);
        let channel = if wants_right && channels > 1 { 1 } else { 0 };

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            channel,
        })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }
}

fn wav_error(path: &Path, error: hound::Error) -> SyncError {
    match error {
        hound::Error::IoError(e) => SyncError::io(path, e),
        other => SyncError::decode(path, other),
    }
}

impl ModalityReader for WavAudioReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn probe(&mut self) -> Result<ProbeInfo> {
        let spec = self.reader.spec();
        Ok(ProbeInfo {
            sample_count: self.reader.duration() as u64,
            rate: SampleRate::Regular(spec.sample_rate as f64),
            channels: 1,
            duration_hint: None,
        })
    }

    fn read_window(&mut self, start: u64, length: u64) -> Result<WindowData> {
        check_window(&self.path, start, length, self.reader.duration() as u64)?;
        let start_frame = u32::try_from(start)
            .map_err(|_| SyncError::decode(&self.path, "offset beyond WAV addressing"))?;
        self.reader
            .seek(start_frame)
            .map_err(|e| SyncError::io(&self.path, e))?;

        let spec = self.reader.spec();
        let channels = spec.channels as usize;
        let wanted = length as usize * channels;
        let mut values = Vec::with_capacity(length as usize);

        match spec.sample_format {
            SampleFormat::Float => {
                for (i, sample) in self.reader.samples::<f32>().take(wanted).enumerate() {
                    let sample = sample.map_err(|e| wav_error(&self.path, e))?;
                    if i % channels == self.channel {
                        values.push(sample as f64);
                    }
                }
            }
            SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample.max(1) - 1)) as f64;
                for (i, sample) in self.reader.samples::<i32>().take(wanted).enumerate() {
                    let sample = sample.map_err(|e| wav_error(&self.path, e))?;
                    if i % channels == self.channel {
                        values.push(sample as f64 / scale);
                    }
                }
            }
        }

        if values.len() != length as usize {
            return Err(SyncError::decode(
                &self.path,
                format!("expected {} samples, file ended after {}", length, values.len()),
            ));
        }
        let values = Array2::from_shape_vec((length as usize, 1), values)
            .map_err(|e| SyncError::decode(&self.path, e))?;
        Ok(WindowData::Signal(values))
    }
}
