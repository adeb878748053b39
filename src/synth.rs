//! Synthetic recordings for demos and tests.
//!
//! Every writer produces one file of a given duration. File names carry the
//! start time as `<prefix>_<YYYY-MM-DDTHH-MM-SS>.<ext>` so a modality can be
//! cataloged with [`file_name_timestamp`].

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use ndarray::{Array1, Array2};
use serde_json::json;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::codec::{BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;

use crate::config::{FrequencySpec, ModalityConfig, ModalityKind, SessionConfig, SignalShape, TimestampConfig};
use crate::error::{Result, SyncError};
use crate::timestamp;

pub const FILE_NAME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// `prefix_2021-03-02T09-33-56.ext`
pub fn file_name(prefix: &str, start: DateTime<FixedOffset>, extension: &str) -> String {
    format!("{}_{}.{}", prefix, start.format(FILE_NAME_FORMAT), extension)
}

/// Timestamp rule matching [`file_name`].
pub fn file_name_timestamp() -> TimestampConfig {
    TimestampConfig {
        delimiter: Some("_".to_string()),
        position: Some(1),
        format: Some(FILE_NAME_FORMAT.to_string()),
    }
}

fn sample_count(frequency: f64, duration: f64) -> usize {
    (frequency * duration).round().max(0.0) as usize
}

/// Sine of `hz` with a per-channel phase shift.
fn sine(channel: usize, t: f64, hz: f64) -> f64 {
    (2.0 * PI * hz * t + channel as f64 * PI / 4.0).sin()
}

/// One value per row in `channels` whitespace separated columns.
pub fn write_regular_text(path: &Path, frequency: f64, duration: f64, channels: usize) -> Result<u64> {
    let n = sample_count(frequency, duration);
    let file = File::create(path).map_err(|e| SyncError::io(path, e))?;
    let mut out = BufWriter::new(file);
    for i in 0..n {
        let t = i as f64 / frequency;
        let row: Vec<String> = (0..channels.max(1))
            .map(|c| format!("{:.6}", sine(c, t, 1.0)))
            .collect();
        writeln!(out, "{}", row.join(" ")).map_err(|e| SyncError::io(path, e))?;
    }
    out.flush().map_err(|e| SyncError::io(path, e))?;
    Ok(n as u64)
}

/// Irregular samples: column 0 holds milliseconds since the file start,
/// the last row is at `duration` exactly. `seed` makes the jitter repeatable.
pub fn write_irregular_text(path: &Path, mean_rate: f64, duration: f64, channels: usize, seed: u64) -> Result<u64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut times = vec![0.0];
    let mean_step = 1.0 / mean_rate;
    loop {
        let next = times[times.len() - 1] + mean_step * (0.5 + rng.f64());
        if next >= duration {
            break;
        }
        times.push(next);
    }
    if duration > 0.0 {
        times.push(duration);
    }

    let file = File::create(path).map_err(|e| SyncError::io(path, e))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "# time_ms values").map_err(|e| SyncError::io(path, e))?;
    for t in &times {
        let mut row = format!("{:.3}", t * 1000.0);
        for c in 0..channels.max(1) {
            row.push_str(&format!(",{:.6}", sine(c, *t, 0.2)));
        }
        writeln!(out, "{}", row).map_err(|e| SyncError::io(path, e))?;
    }
    out.flush().map_err(|e| SyncError::io(path, e))?;
    Ok(times.len() as u64)
}

/// 16-bit PCM, left and right channels at different pitches.
pub fn write_wav(path: &Path, sample_rate: u32, duration: f64, channels: u16) -> Result<u64> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| SyncError::decode(path, e))?;
    let n = sample_count(sample_rate as f64, duration);
    for i in 0..n {
        let t = i as f64 / sample_rate as f64;
        for c in 0..channels {
            let value = 0.5 * (2.0 * PI * 440.0 * (c as f64 + 1.0) * t).sin();
            writer
                .write_sample((value * i16::MAX as f64) as i16)
                .map_err(|e| SyncError::decode(path, e))?;
        }
    }
    writer.finalize().map_err(|e| SyncError::decode(path, e))?;
    Ok(n as u64)
}

/// Zarr store with one stream group: `data [channels, samples]` as float32,
/// `time [samples]` as float64 seconds and `stream_info.nominal_srate`.
///
/// A `frequency` of 0 writes jittered time stamps and a nominal rate of 0.
pub fn write_zarr(
    path: &Path,
    stream: &str,
    frequency: f64,
    duration: f64,
    channels: usize,
    start: DateTime<FixedOffset>,
) -> Result<u64> {
    let zarr_err = |e: &dyn std::fmt::Display| SyncError::decode(path, e);
    std::fs::create_dir_all(path).map_err(|e| SyncError::io(path, e))?;
    let store = Arc::new(FilesystemStore::new(path).map_err(|e| zarr_err(&e))?);

    let root = GroupBuilder::new().build(store.clone(), "/").map_err(|e| zarr_err(&e))?;
    root.store_metadata().map_err(|e| zarr_err(&e))?;

    let stream_path = format!("/{}", stream);
    let mut group = GroupBuilder::new()
        .build(store.clone(), &stream_path)
        .map_err(|e| zarr_err(&e))?;
    let mut attrs = serde_json::Map::new();
    attrs.insert(
        "stream_info".to_string(),
        json!({
            "name": stream,
            "channel_count": channels,
            "nominal_srate": frequency,
            "channel_format": "Float32",
        }),
    );
    attrs.insert("recorded_at".to_string(), json!(start.to_rfc3339()));
    group.attributes_mut().extend(attrs);
    group.store_metadata().map_err(|e| zarr_err(&e))?;

    let t0 = start.timestamp() as f64 + start.timestamp_subsec_micros() as f64 / 1e6;
    let times: Vec<f64> = if frequency > 0.0 {
        (0..sample_count(frequency, duration))
            .map(|i| t0 + i as f64 / frequency)
            .collect()
    } else {
        let mut rng = fastrand::Rng::with_seed(duration.to_bits().wrapping_add(channels as u64));
        let mut rel = vec![0.0];
        while let Some(last) = rel.last().copied() {
            let next = last + 0.01 * (0.5 + rng.f64());
            if next >= duration {
                break;
            }
            rel.push(next);
        }
        rel.push(duration);
        rel.into_iter().map(|t| t0 + t).collect()
    };
    let n = times.len();
    let channels = channels.max(1);

    let compression_level = BloscCompressionLevel::try_from(5u8).map_err(|e| zarr_err(&e))?;
    let data_codec = Arc::new(
        BloscCodec::new(
            BloscCompressor::LZ4,
            compression_level,
            None,
            BloscShuffleMode::BitShuffle,
            Some(4),
        )
        .map_err(|e| zarr_err(&e))?,
    );
    let chunk_samples = (n as u64).clamp(1, 1000);
    let data_array = ArrayBuilder::new(
        vec![channels as u64, n as u64],
        vec![channels as u64, chunk_samples],
        DataType::Float32,
        FillValue::from(0.0f32),
    )
    .dimension_names(Some(vec![Some("channels".to_string()), Some("samples".to_string())]))
    .bytes_to_bytes_codecs(vec![data_codec])
    .build(store.clone(), &format!("{}/data", stream_path))
    .map_err(|e| zarr_err(&e))?;
    data_array.store_metadata().map_err(|e| zarr_err(&e))?;

    let time_codec = Arc::new(
        BloscCodec::new(
            BloscCompressor::LZ4,
            compression_level,
            None,
            BloscShuffleMode::BitShuffle,
            Some(8),
        )
        .map_err(|e| zarr_err(&e))?,
    );
    let time_array = ArrayBuilder::new(
        vec![n as u64],
        vec![chunk_samples],
        DataType::Float64,
        FillValue::from(0.0f64),
    )
    .dimension_names(Some(vec![Some("samples".to_string())]))
    .bytes_to_bytes_codecs(vec![time_codec])
    .build(store.clone(), &format!("{}/time", stream_path))
    .map_err(|e| zarr_err(&e))?;
    time_array.store_metadata().map_err(|e| zarr_err(&e))?;

    if n > 0 {
        let data = Array2::from_shape_fn((channels, n), |(c, i)| sine(c, times[i] - t0, 2.0) as f32);
        data_array
            .store_array_subset_ndarray::<f32, _>(&[0, 0], data)
            .map_err(|e| zarr_err(&e))?;
        time_array
            .store_array_subset_ndarray::<f64, _>(&[0], Array1::from(times))
            .map_err(|e| zarr_err(&e))?;
    }
    Ok(n as u64)
}

/// MP4 with one AVC track of `fps` placeholder frames.
///
/// The samples are not decodable pictures; only the sample table matters to
/// the catalog and the frame handles.
pub fn write_mp4(path: &Path, fps: u32, duration: f64) -> Result<u64> {
    let fps = fps.max(1);
    write_mp4_frames(path, fps * 1000, 1000, sample_count(fps as f64, duration))
}

/// MP4 of `frames` placeholder frames lasting `frame_ticks` units of
/// `timescale` each, e.g. 30000 and 1001 for NTSC 29.97 fps.
pub fn write_mp4_frames(path: &Path, timescale: u32, frame_ticks: u32, frames: usize) -> Result<u64> {
    let mp4_err = |e: mp4::Error| match e {
        mp4::Error::IoError(io) => SyncError::io(path, io),
        other => SyncError::decode(path, other),
    };
    let timescale = timescale.max(1);
    let frame_ticks = frame_ticks.max(1);
    let key_interval = (timescale / frame_ticks).max(1) as usize;
    let file = File::create(path).map_err(|e| SyncError::io(path, e))?;

    let mp4_config = mp4::Mp4Config {
        major_brand: str::parse("isom").map_err(mp4_err)?,
        minor_version: 512,
        compatible_brands: vec![str::parse("isom").map_err(mp4_err)?, str::parse("avc1").map_err(mp4_err)?],
        timescale,
    };
    let mut writer = mp4::Mp4Writer::write_start(BufWriter::new(file), &mp4_config).map_err(mp4_err)?;
    writer
        .add_track(&mp4::TrackConfig {
            track_type: mp4::TrackType::Video,
            timescale,
            language: String::from("und"),
            media_conf: mp4::MediaConfig::AvcConfig(mp4::AvcConfig {
                width: 64,
                height: 48,
                seq_param_set: vec![0x67, 0x42, 0xc0, 0x0a],
                pic_param_set: vec![0x68, 0xce, 0x3c, 0x80],
            }),
        })
        .map_err(mp4_err)?;

    for i in 0..frames {
        let sample = mp4::Mp4Sample {
            start_time: i as u64 * frame_ticks as u64,
            duration: frame_ticks,
            rendering_offset: 0,
            is_sync: i % key_interval == 0,
            bytes: Bytes::from((i as u32).to_be_bytes().to_vec()),
        };
        writer.write_sample(1, &sample).map_err(mp4_err)?;
    }
    writer.write_end().map_err(mp4_err)?;
    writer.into_writer().flush().map_err(|e| SyncError::io(path, e))?;
    Ok(frames as u64)
}

/// Layout of a demo recording.
#[derive(Debug, Clone)]
pub struct DemoRecording {
    pub start: DateTime<FixedOffset>,
    /// Seconds per file.
    pub file_duration: f64,
    pub files: usize,
    /// Start-time offset of the signal files relative to the video files.
    pub signal_lag: f64,
    pub video_fps: u32,
    pub signal_rate: f64,
    pub audio_rate: u32,
}

impl Default for DemoRecording {
    fn default() -> Self {
        Self {
            start: timestamp::default_timestamp(crate::config::utc_offset()),
            file_duration: 60.0,
            files: 3,
            signal_lag: 2.0,
            video_fps: 25,
            signal_rate: 250.0,
            audio_rate: 8000,
        }
    }
}

/// Write a five-modality recording under `root` and return its session configuration.
///
/// Modalities: `camera` (MP4), `ecg` (regular text), `resp` (irregular
/// text), `eeg` (Zarr) and `audio` (WAV, right channel).
pub fn write_demo_recording(root: &Path, layout: &DemoRecording) -> Result<SessionConfig> {
    let dir = |name: &str| -> Result<PathBuf> {
        let d = root.join(name);
        std::fs::create_dir_all(&d).map_err(|e| SyncError::io(&d, e))?;
        Ok(d)
    };
    let (video_dir, ecg_dir, resp_dir, eeg_dir, audio_dir) =
        (dir("video")?, dir("ecg")?, dir("resp")?, dir("eeg")?, dir("audio")?);

    for i in 0..layout.files {
        let offset = i as f64 * layout.file_duration;
        let video_start = timestamp::offset_by_seconds(layout.start, offset);
        let signal_start = timestamp::offset_by_seconds(layout.start, offset + layout.signal_lag);

        write_mp4(
            &video_dir.join(file_name("camera", video_start, "mp4")),
            layout.video_fps,
            layout.file_duration,
        )?;
        write_regular_text(
            &ecg_dir.join(file_name("ecg", signal_start, "txt")),
            layout.signal_rate,
            layout.file_duration,
            1,
        )?;
        write_irregular_text(
            &resp_dir.join(file_name("resp", signal_start, "csv")),
            5.0,
            layout.file_duration,
            1,
            i as u64,
        )?;
        write_zarr(
            &eeg_dir.join(file_name("eeg", signal_start, "zarr")),
            "EEG",
            layout.signal_rate,
            layout.file_duration,
            4,
            signal_start,
        )?;
        write_wav(
            &audio_dir.join(file_name("audio", video_start, "wav")),
            layout.audio_rate,
            layout.file_duration,
            2,
        )?;
    }

    let modality = |id: &str, kind: ModalityKind, directory: PathBuf, pattern: &str| ModalityConfig {
        id: id.to_string(),
        kind,
        directory,
        pattern: pattern.to_string(),
        timestamp: file_name_timestamp(),
        key: None,
        frequency: None,
        shape: SignalShape::RegularVector,
        required: true,
    };

    let mut ecg = modality("ecg", ModalityKind::Signal, ecg_dir, "ecg_*.txt");
    ecg.frequency = Some(FrequencySpec::Value(layout.signal_rate));
    let mut resp = modality("resp", ModalityKind::Signal, resp_dir, "resp_*.csv");
    resp.frequency = Some(FrequencySpec::Value(FrequencySpec::IRREGULAR));
    resp.shape = SignalShape::TimestampedMatrix;
    let mut eeg = modality("eeg", ModalityKind::Signal, eeg_dir, "eeg_*.zarr");
    eeg.key = Some("EEG".to_string());
    eeg.frequency = Some(FrequencySpec::Attribute("stream_info.nominal_srate".to_string()));
    let mut audio = modality("audio", ModalityKind::Audio, audio_dir, "audio_*.wav");
    audio.key = Some("right".to_string());

    Ok(SessionConfig {
        chunk_duration_secs: layout.file_duration,
        reference_modality: Some("camera".to_string()),
        window_duration_secs: (layout.file_duration / 6.0).max(1.0),
        modalities: vec![
            modality("camera", ModalityKind::Video, video_dir, "camera_*.mp4"),
            ecg,
            resp,
            eeg,
            audio,
        ],
        ..SessionConfig::default()
    })
}
