use clap::Args;
use serde_json::json;
use std::path::PathBuf;

use crate::config::{EndPolicy, SessionConfig};

/// Arguments shared by every tool that opens a session.
#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    #[arg(help = "Session file (JSON) describing the modalities of the recording")]
    pub session: PathBuf,

    #[arg(
        long,
        help = "Chunk duration in seconds (overrides the session file)"
    )]
    pub chunk_duration: Option<f64>,

    #[arg(
        long,
        value_parser = ["longest", "shortest"],
        help = "End of the recording: latest modality end (longest) or earliest (shortest)"
    )]
    pub end_policy: Option<String>,

    #[arg(
        long,
        help = "Start-time drift in seconds absorbed without creating a gap"
    )]
    pub tolerance: Option<f64>,

    #[arg(
        long,
        help = "Offset of the file name timestamps, e.g. +01:00 (default UTC)"
    )]
    pub time_zone: Option<String>,

    #[arg(long, help = "Modality whose frequency defines cursor sample indices")]
    pub reference: Option<String>,

    #[arg(long, short = 'q', help = "Minimal output mode")]
    pub quiet: bool,
}

impl SessionArgs {
    /// Load the session file and apply command-line overrides.
    pub fn load(&self) -> anyhow::Result<SessionConfig> {
        let mut config = SessionConfig::load(&self.session)?;
        if let Some(d) = self.chunk_duration {
            config.chunk_duration_secs = d;
        }
        if let Some(policy) = self.end_policy.as_deref() {
            config.end_policy = match policy {
                "shortest" => EndPolicy::Shortest,
                _ => EndPolicy::Longest,
            };
        }
        if let Some(t) = self.tolerance {
            config.tolerance_secs = t;
        }
        if let Some(tz) = &self.time_zone {
            config.time_zone = Some(tz.clone());
        }
        if let Some(reference) = &self.reference {
            config.reference_modality = Some(reference.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Effective settings as JSON, for reports.
    pub fn to_settings_json(&self, config: &SessionConfig) -> anyhow::Result<String> {
        let settings = json!({
            "session": self.session.display().to_string(),
            "chunk_duration_secs": config.chunk_duration_secs,
            "end_policy": config.end_policy,
            "tolerance_secs": config.tolerance_secs,
            "time_zone": config.time_zone,
            "reference_modality": config.reference_modality,
            "modalities": config.modalities.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            "toolbox_version": env!("CARGO_PKG_VERSION")
        });
        Ok(serde_json::to_string_pretty(&settings)?)
    }
}
