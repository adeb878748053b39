//! Long Recording Toolbox - synchronized navigation of long multimodal recordings
//!
//! Clinical recordings (several cameras, physiological signals at different
//! rates, audio) are captured by independent devices into many files that do
//! not start or stop together. This crate presents them as one continuous,
//! seekable timeline.
//!
//! # Overview
//!
//! ```text
//! timestamp ─► catalog ─► planner ─► navigation ─► display / annotation
//!                 ▲                      │
//!                 └──── reader ◄─────────┘
//! ```
//!
//! - [`timestamp`] - start time of a file from its name
//! - [`catalog`] - per-modality file lists sorted by start time
//! - [`reader`] - uniform windowed reads over text, Zarr, WAV and MP4 files
//! - [`planner`] - global span, fixed-length chunks and per-chunk segment plans
//! - [`navigation`] - cursor, active chunk, display window and the background chunk loader
//! - [`annotation`] - `TS1 - TS2` interval lines in datetime or `chunk_sample` form
//! - [`session`] - one open recording tying the above together
//! - [`cache`] - optional disposable on-disk copy of a plan
//! - [`synth`] - synthetic recordings for demos and tests
//!
//! # Command-Line Tools
//!
//! - `longrec-toolbox` - terminal navigator
//! - `longrec-inspect` - catalog report with every excluded file
//! - `longrec-plan` - recording span and chunk plans
//! - `longrec-navigate` - headless navigation over stdin commands
//! - `longrec-dummy-data` - writes a synthetic recording
//!
//! # Quick Start
//!
//! ```bash
//! # Write a three-file demo recording and its session file
//! longrec-dummy-data --output demo
//!
//! # Check what was found and how it lines up
//! longrec-inspect demo/session.json
//! longrec-plan demo/session.json --verbose
//!
//! # Navigate
//! longrec-toolbox demo/session.json
//! ```
//!
//! # Session File
//!
//! ```json
//! {
//!   "chunk_duration_secs": 1800,
//!   "end_policy": "longest",
//!   "reference_modality": "BW1",
//!   "modalities": [
//!     {"id": "BW1", "kind": "video", "directory": "video", "pattern": "BW1_*.mp4",
//!      "timestamp": {"delimiter": "_", "position": 1, "format": "%Y-%m-%dT%H-%M-%S"}},
//!     {"id": "ECG", "kind": "signal", "directory": "ecg", "pattern": "*.txt",
//!      "frequency": 250, "timestamp": {"delimiter": "_", "position": 1, "format": "posix"}}
//!   ]
//! }
//! ```
//!
//! # License
//!
//! This project is licensed under the GNU General Public License v3.0.
//! See LICENSE.md for details.

pub mod error;
pub mod config;
pub mod timestamp;
pub mod catalog;
pub mod reader;
pub mod planner;
pub mod navigation;
pub mod annotation;
pub mod session;
pub mod cache;
pub mod synth;
pub mod cli;
pub mod commands;

use chrono::Datelike;
use tracing_subscriber::EnvFilter;

/// Display GPL license notice for a program
pub fn display_license_notice(program_name: &str) {
	let version = env!("CARGO_PKG_VERSION");
	let current_year = chrono::Utc::now().year();
	let copyright_year = if current_year == 2026 {
		"2026".to_string()
	} else {
		format!("2026-{}", current_year)
	};

	println!("{} {} Copyright (C) {} the longrec-toolbox contributors", program_name, version, copyright_year);
	println!("This program comes with ABSOLUTELY NO WARRANTY.");
	println!("For details see https://www.gnu.org/licenses/gpl-3.0.html#license-text.");
	println!("This is free software, and you are welcome to redistribute it under certain conditions.");
	println!();
}

/// Install the `tracing` subscriber used by every binary.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `warn` in quiet mode.
pub fn init_logging(quiet: bool) {
	let default = if quiet { "warn" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	// a second call (tests, embedding) keeps the first subscriber
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.try_init();
}
