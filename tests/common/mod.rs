#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use longrec_toolbox::config::{utc_offset, SessionConfig};
use longrec_toolbox::synth::{self, DemoRecording};
use longrec_toolbox::timestamp;
use std::path::Path;

/// Two 10 s files per modality, camera at 10 fps, signals starting 2 s late.
///
/// The recording spans 22 s: chunks of 10 s, 10 s and 2 s, with 100, 100
/// and 20 reference samples.
pub fn small_layout() -> DemoRecording {
    DemoRecording {
        start: start(),
        file_duration: 10.0,
        files: 2,
        signal_lag: 2.0,
        video_fps: 10,
        signal_rate: 50.0,
        audio_rate: 800,
    }
}

pub fn start() -> DateTime<FixedOffset> {
    timestamp::default_timestamp(utc_offset())
}

pub fn at(seconds: f64) -> DateTime<FixedOffset> {
    timestamp::offset_by_seconds(start(), seconds)
}

pub fn write_small_demo(root: &Path) -> Result<SessionConfig> {
    Ok(synth::write_demo_recording(root, &small_layout())?)
}
