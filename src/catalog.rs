//! Per-modality file discovery.
//!
//! A catalog lists the files of one modality with their start time (from the
//! file name) and their length (from a header probe), sorted by start time.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{FrequencySpec, ModalityConfig};
use crate::error::{Result, SyncError};
use crate::reader::{self, ReaderKind, SampleRate};
use crate::timestamp;

/// Key of one camera or signal stream, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModalityId(String);

impl ModalityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModalityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One cataloged file. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    pub modality_id: ModalityId,
    pub start_time: DateTime<FixedOffset>,
    pub sample_count: u64,
    /// Hz, `0.0` for irregular sampling.
    pub frequency: f64,
    /// Seconds.
    pub duration: f64,
    pub channels: usize,
}

impl SourceFile {
    pub fn is_irregular(&self) -> bool {
        self.frequency == 0.0
    }

    pub fn end_time(&self) -> DateTime<FixedOffset> {
        timestamp::offset_by_seconds(self.start_time, self.duration)
    }
}

/// A problem found while building a catalog. Collected, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogIssue {
    pub modality: ModalityId,
    pub path: Option<PathBuf>,
    pub message: String,
    /// The file was left out of the catalog.
    pub excluded: bool,
}

impl fmt::Display for CatalogIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.excluded { "excluded" } else { "warning" };
        match &self.path {
            Some(path) => write!(f, "[{}] {} {}: {}", self.modality, what, path.display(), self.message),
            None => write!(f, "[{}] {}: {}", self.modality, what, self.message),
        }
    }
}

/// Ordered files of one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCatalog {
    pub modality: ModalityId,
    pub files: Vec<SourceFile>,
}

/// Catalog plus everything that went wrong while building it.
#[derive(Debug)]
pub struct CatalogBuild {
    pub catalog: FileCatalog,
    pub issues: Vec<CatalogIssue>,
}

impl FileCatalog {
    /// Scan `directory` for `pattern` (non-recursive) and probe every match.
    ///
    /// Unreadable files and bad file name timestamps are excluded and
    /// reported. `reference_frequency` resolves a frequency of `-1`.
    pub fn build(
        config: &ModalityConfig,
        tz: FixedOffset,
        reference_frequency: Option<f64>,
    ) -> Result<CatalogBuild> {
        let modality = ModalityId::new(config.id.as_str());
        let paths = list_files(&config.directory, &config.pattern)?;
        let kind = ReaderKind::for_modality(config);
        let mut issues = Vec::new();

        tracing::info!(
            "[{}] {} file(s) match {}",
            modality,
            paths.len(),
            config.directory.join(&config.pattern).display()
        );

        let configured_frequency =
            match resolve_configured_frequency(config, &paths, kind, reference_frequency) {
                Ok(f) => f,
                Err(e) => {
                    issues.push(CatalogIssue {
                        modality: modality.clone(),
                        path: None,
                        message: e.to_string(),
                        excluded: true,
                    });
                    tracing::warn!("[{}] {}", modality, e);
                    return Ok(CatalogBuild {
                        catalog: FileCatalog {
                            modality,
                            files: Vec::new(),
                        },
                        issues,
                    });
                }
            };

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            match catalog_file(&path, config, &modality, kind, tz, configured_frequency) {
                Ok(file) => files.push(file),
                Err(e) => {
                    tracing::warn!("[{}] excluding {}: {}", modality, path.display(), e);
                    issues.push(CatalogIssue {
                        modality: modality.clone(),
                        path: Some(path),
                        message: e.to_string(),
                        excluded: true,
                    });
                }
            }
        }

        let (catalog, overlap_issues) = FileCatalog::from_files(modality, files);
        issues.extend(overlap_issues);
        Ok(CatalogBuild { catalog, issues })
    }

    /// Order already-probed files and check regular files for overlaps.
    ///
    /// Empty files are excluded. Regular files are all planned on the
    /// frequency of the first one, their duration recomputed from their
    /// sample count; a file whose own rate differs by more than
    /// [`FREQUENCY_TOLERANCE`] is kept with a warning. Overlapping files are
    /// kept (the planner lets the earlier file win) and reported as warnings.
    pub fn from_files(modality: ModalityId, mut files: Vec<SourceFile>) -> (Self, Vec<CatalogIssue>) {
        files.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut issues = Vec::new();
        files.retain(|file| {
            if file.duration > 0.0 {
                return true;
            }
            tracing::warn!("[{}] excluding {}: no data (zero duration)", modality, file.path.display());
            issues.push(CatalogIssue {
                modality: modality.clone(),
                path: Some(file.path.clone()),
                message: "no data (zero duration)".to_string(),
                excluded: true,
            });
            false
        });

        let reference = files.iter().find(|f| !f.is_irregular()).map(|f| f.frequency);
        if let Some(reference) = reference {
            for file in files.iter_mut().filter(|f| !f.is_irregular()) {
                if file.frequency == reference {
                    continue;
                }
                if !same_frequency(file.frequency, reference) {
                    let message = format!(
                        "frequency {} Hz differs from {} Hz of the first file, planned at {} Hz",
                        file.frequency, reference, reference
                    );
                    tracing::warn!("[{}] {}: {}", modality, file.path.display(), message);
                    issues.push(CatalogIssue {
                        modality: modality.clone(),
                        path: Some(file.path.clone()),
                        message,
                        excluded: false,
                    });
                }
                file.frequency = reference;
                file.duration = file.sample_count as f64 / reference;
            }
        }

        let mut previous: Option<&SourceFile> = None;
        for file in files.iter().filter(|f| !f.is_irregular()) {
            if let Some(prev) = previous {
                let overlap = timestamp::seconds_between(file.start_time, prev.end_time());
                if overlap > 0.0 {
                    issues.push(CatalogIssue {
                        modality: modality.clone(),
                        path: Some(file.path.clone()),
                        message: format!(
                            "starts {:.3} s before the end of {}",
                            overlap,
                            prev.path.display()
                        ),
                        excluded: false,
                    });
                }
            }
            if previous.is_none_or(|p| file.end_time() > p.end_time()) {
                previous = Some(file);
            }
        }

        (Self { modality, files }, issues)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn first_start(&self) -> Option<DateTime<FixedOffset>> {
        self.files.first().map(|f| f.start_time)
    }

    /// End of the latest-ending file.
    pub fn last_end(&self) -> Option<DateTime<FixedOffset>> {
        self.files.iter().map(SourceFile::end_time).max()
    }

    /// Frequency shared by the files, `None` when irregular or mixed.
    pub fn frequency(&self) -> Option<f64> {
        let first = self.files.first()?.frequency;
        (first > 0.0 && self.files.iter().all(|f| f.frequency == first)).then_some(first)
    }
}

/// Relative difference under which two file rates count as the same rate.
///
/// Rates derived from container durations (29.97 fps as 30000/1001 ticks)
/// differ in their last digits from file to file.
pub const FREQUENCY_TOLERANCE: f64 = 1e-6;

fn same_frequency(a: f64, b: f64) -> bool {
    (a - b).abs() <= FREQUENCY_TOLERANCE * a.abs().max(b.abs())
}

/// Sorted paths matching `directory/pattern`.
fn list_files(directory: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = directory.join(pattern);
    let full = full
        .to_str()
        .ok_or_else(|| SyncError::InvalidConfig(format!("non UTF-8 path {}", full.display())))?;

    let mut paths = Vec::new();
    let entries = glob::glob_with(
        full,
        glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        },
    )
    .map_err(|e| SyncError::InvalidConfig(format!("bad pattern '{}': {}", pattern, e)))?;
    for entry in entries {
        match entry {
            Ok(path) => paths.push(path),
            Err(e) => tracing::warn!("cannot read {}: {}", e.path().display(), e.error()),
        }
    }
    paths.sort();
    Ok(paths)
}

/// Frequency fixed by configuration, `None` when it comes from each file header.
fn resolve_configured_frequency(
    config: &ModalityConfig,
    paths: &[PathBuf],
    kind: ReaderKind,
    reference_frequency: Option<f64>,
) -> Result<Option<f64>> {
    if kind.is_irregular() {
        return Ok(Some(FrequencySpec::IRREGULAR));
    }
    match &config.frequency {
        None => Ok(None),
        Some(FrequencySpec::Value(f)) if *f == FrequencySpec::SAME_AS_REFERENCE => reference_frequency
            .map(Some)
            .ok_or_else(|| {
                SyncError::InvalidConfig(format!(
                    "modality '{}' follows the reference frequency but none is known",
                    config.id
                ))
            }),
        Some(FrequencySpec::Value(f)) => Ok(Some(*f)),
        Some(FrequencySpec::Attribute(name)) => {
            // read once, from the first file
            let Some(first) = paths.first() else {
                return Ok(None);
            };
            let mut reader = reader::open_reader(first, kind, config.key.as_deref())?;
            let f = reader.attribute(name)?;
            tracing::debug!("[{}] {} = {} Hz from {}", config.id, name, f, first.display());
            Ok(Some(f))
        }
    }
}

fn catalog_file(
    path: &Path,
    config: &ModalityConfig,
    modality: &ModalityId,
    kind: ReaderKind,
    tz: FixedOffset,
    configured_frequency: Option<f64>,
) -> Result<SourceFile> {
    let start_time = timestamp::resolve(path, &config.timestamp, tz)?;

    // handle dropped at the end of this scope
    let mut reader = reader::open_reader(path, kind, config.key.as_deref())?;
    let info = reader.probe()?;

    let (frequency, duration) = match (info.rate, configured_frequency) {
        (SampleRate::Irregular, _) => (0.0, info.duration_hint.unwrap_or(0.0)),
        // a video with zero fps gets zero duration and is skipped by the planner
        (_, Some(f)) | (SampleRate::Regular(f), None) => {
            (f, if f > 0.0 { info.sample_count as f64 / f } else { 0.0 })
        }
        (SampleRate::Unknown, None) => {
            return Err(SyncError::InvalidConfig(format!(
                "no frequency in {} and none configured",
                path.display()
            )));
        }
    };

    tracing::debug!(
        "[{}] {} start={} samples={} freq={} duration={:.3}s",
        modality,
        path.display(),
        timestamp::format_datetime(start_time),
        info.sample_count,
        frequency,
        duration
    );

    Ok(SourceFile {
        path: path.to_path_buf(),
        modality_id: modality.clone(),
        start_time,
        sample_count: info.sample_count,
        frequency,
        duration,
        channels: info.channels,
    })
}
