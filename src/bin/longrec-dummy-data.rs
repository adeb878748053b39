//! Longrec Dummy Data - synthetic multi-file recording generator
//!
//! Writes a recording split into several files per modality, each file named
//! after its start time, plus a `session.json` describing it:
//!
//! - `video/camera_<start>.mp4`  placeholder MP4 frames
//! - `ecg/ecg_<start>.txt`       regular single-column text
//! - `resp/resp_<start>.csv`     irregular text (milliseconds, value)
//! - `eeg/eeg_<start>.zarr`      4-channel Zarr stream
//! - `audio/audio_<start>.wav`   stereo 16-bit WAV
//!
//! Signal files start `--lag` seconds after the video files so the plan
//! contains leading gaps.

use anyhow::Result;
use clap::Parser;
use longrec_toolbox::config::utc_offset;
use longrec_toolbox::synth::{self, DemoRecording};
use longrec_toolbox::timestamp;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "longrec-dummy-data")]
#[command(about = "Write a synthetic multi-file recording and its session file")]
struct Args {
    #[arg(long, short = 'o', help = "Output directory", default_value = "demo")]
    output: PathBuf,

    #[arg(long, help = "Files per modality", default_value = "3")]
    files: usize,

    #[arg(long, help = "Duration of each file in seconds", default_value = "60")]
    file_duration: f64,

    #[arg(long, help = "Signal start lag behind the video in seconds", default_value = "2")]
    lag: f64,

    #[arg(long, help = "Video frame rate", default_value = "25")]
    fps: u32,

    #[arg(long, help = "Signal sampling rate in Hz", default_value = "250")]
    signal_rate: f64,

    #[arg(long, help = "Audio sampling rate in Hz", default_value = "8000")]
    audio_rate: u32,

    #[arg(
        long,
        help = "Start of the first file (YYYY-MM-DDTHH:MM:SS, UTC)",
        default_value = "2000-01-01T00:00:00"
    )]
    start: String,

    #[arg(short = 'q', long = "quiet", help = "Minimal output mode")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    longrec_toolbox::init_logging(args.quiet);

    if args.files == 0 || !(args.file_duration > 0.0) {
        return Err(anyhow::anyhow!("need at least one file of positive duration"));
    }

    let layout = DemoRecording {
        start: timestamp::parse_datetime(&args.start, utc_offset())?,
        file_duration: args.file_duration,
        files: args.files,
        signal_lag: args.lag,
        video_fps: args.fps,
        signal_rate: args.signal_rate,
        audio_rate: args.audio_rate,
    };

    if !args.quiet {
        longrec_toolbox::display_license_notice("longrec-dummy-data");
        println!("Long Recording Dummy Data Generator");
        println!("===================================");
        println!("Output:\t\t{}", args.output.display());
        println!("Files:\t\t{} per modality", args.files);
        println!("File duration:\t{} s", args.file_duration);
        println!("Start:\t\t{}", timestamp::format_datetime(layout.start));
        println!("Signal lag:\t{} s", args.lag);
        println!("Video:\t\t{} fps", args.fps);
        println!("Signals:\t{} Hz", args.signal_rate);
        println!("Audio:\t\t{} Hz", args.audio_rate);
        println!();
    }

    std::fs::create_dir_all(&args.output)?;
    let mut config = synth::write_demo_recording(&args.output, &layout)?;

    // session file lives next to the data, keep directories relative to it
    for modality in &mut config.modalities {
        if let Ok(relative) = modality.directory.strip_prefix(&args.output) {
            modality.directory = relative.to_path_buf();
        }
    }
    let session_path = args.output.join("session.json");
    config.save(&session_path)?;

    if !args.quiet {
        println!("Wrote {} modalities", config.modalities.len());
        println!("Session file:\t{}", session_path.display());
        println!();
        println!("Next: longrec-plan {}", session_path.display());
    }
    Ok(())
}
