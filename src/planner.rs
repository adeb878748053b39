//! Synchronization planning.
//!
//! The planner puts every modality on one global time axis, cuts it into
//! fixed-length chunks and, for each (chunk, modality) pair, lists the file
//! pieces and gaps that assemble the modality's data for that chunk.
//!
//! Regular modalities are planned on a global sample grid: chunk `c` owns the
//! samples `[round(offset_c * f), round(offset_{c+1} * f))`, so the segment
//! lengths of one entry always add up to the chunk's sample count and
//! consecutive chunks never share or drop a sample. Irregular modalities are
//! planned in seconds, their sample counts are only known at read time.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::catalog::{FileCatalog, ModalityId, SourceFile};
use crate::config::EndPolicy;
use crate::error::{Result, SyncError};
use crate::timestamp;

/// Remainders shorter than this do not open an extra chunk.
const CHUNK_EPSILON_SECS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanOptions {
    /// Seconds.
    pub chunk_duration: f64,
    pub end_policy: EndPolicy,
    /// Start-time drift, in seconds, treated as an exact match with the
    /// previous file end or a chunk boundary.
    pub tolerance: f64,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            chunk_duration: 1800.0,
            end_policy: EndPolicy::Longest,
            tolerance: 1.0,
        }
    }
}

/// Time range covered by the session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordingSpan {
    pub global_start: DateTime<FixedOffset>,
    pub global_end: DateTime<FixedOffset>,
}

impl RecordingSpan {
    pub fn duration_secs(&self) -> f64 {
        timestamp::seconds_between(self.global_start, self.global_end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: usize,
    pub start: DateTime<FixedOffset>,
    /// Seconds since the global start.
    pub offset: f64,
    /// Seconds. Only the last chunk may be shorter than the chunk duration.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentKind {
    /// `length` samples from `local_offset` in a regular file.
    Source {
        path: PathBuf,
        local_offset: u64,
        length: u64,
    },
    /// Every sample of an irregular file with a time in `[local_start, local_end)`
    /// seconds since the file start, or `[local_start, local_end]` when
    /// `closed_end` is set (the range reaches the end of the file).
    TimeRange {
        path: PathBuf,
        local_start: f64,
        local_end: f64,
        closed_end: bool,
    },
    /// No data. `length` is in samples for regular modalities and 0 otherwise.
    Gap { length: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Seconds from the chunk start.
    pub chunk_offset: f64,
    /// Seconds.
    pub duration: f64,
    pub kind: SegmentKind,
}

impl Segment {
    pub fn is_gap(&self) -> bool {
        matches!(self.kind, SegmentKind::Gap { .. })
    }

    /// Length in samples, 0 for time ranges.
    pub fn length(&self) -> u64 {
        match self.kind {
            SegmentKind::Source { length, .. } | SegmentKind::Gap { length } => length,
            SegmentKind::TimeRange { .. } => 0,
        }
    }
}

/// How one modality's data is assembled for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub chunk_index: usize,
    pub modality: ModalityId,
    pub chunk_start: DateTime<FixedOffset>,
    pub chunk_duration: f64,
    /// `None` for irregular modalities.
    pub frequency: Option<f64>,
    /// Samples in the chunk at `frequency`, 0 for irregular modalities.
    pub sample_count: u64,
    /// Ordered, contiguous, covering the whole chunk.
    pub segments: Vec<Segment>,
}

impl ChunkPlan {
    pub fn total_length(&self) -> u64 {
        self.segments.iter().map(Segment::length).sum()
    }

    pub fn covered_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn is_all_gap(&self) -> bool {
        self.segments.iter().all(Segment::is_gap)
    }

    pub fn gap_duration(&self) -> f64 {
        self.segments
            .iter()
            .filter(|s| s.is_gap())
            .map(|s| s.duration)
            .sum()
    }
}

/// Complete plan of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub span: RecordingSpan,
    pub chunk_duration: f64,
    pub chunks: Vec<ChunkInfo>,
    pub modalities: Vec<ModalityId>,
    entries: Vec<BTreeMap<ModalityId, ChunkPlan>>,
}

impl SyncPlan {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn entry(&self, chunk_index: usize, modality: &ModalityId) -> Option<&ChunkPlan> {
        self.entries.get(chunk_index)?.get(modality)
    }

    /// Every modality's entry for one chunk.
    pub fn chunk_entries(&self, chunk_index: usize) -> impl Iterator<Item = &ChunkPlan> {
        self.entries.get(chunk_index).into_iter().flat_map(|m| m.values())
    }

    /// All entries keyed by (chunk index, modality).
    pub fn entries(&self) -> impl Iterator<Item = ((usize, &ModalityId), &ChunkPlan)> {
        self.entries
            .iter()
            .enumerate()
            .flat_map(|(i, m)| m.iter().map(move |(id, plan)| ((i, id), plan)))
    }
}

/// Build the plan for a set of catalogs.
///
/// Fails with [`SyncError::NoData`] listing every catalog without usable
/// files, and with [`SyncError::EmptySpan`] when the end policy leaves nothing.
pub fn plan(catalogs: &[FileCatalog], options: &PlanOptions) -> Result<SyncPlan> {
    if !(options.chunk_duration > 0.0) {
        return Err(SyncError::InvalidConfig(format!(
            "chunk duration must be positive, got {}",
            options.chunk_duration
        )));
    }

    let empty: Vec<String> = catalogs
        .iter()
        .filter(|c| c.files.iter().all(|f| !(f.duration > 0.0)))
        .map(|c| c.modality.to_string())
        .collect();
    if catalogs.is_empty() {
        return Err(SyncError::NoData(Vec::new()));
    }
    if !empty.is_empty() {
        return Err(SyncError::NoData(empty));
    }

    let span = recording_span(catalogs, options.end_policy)?;
    let total = span.duration_secs();
    if !(total > CHUNK_EPSILON_SECS) {
        return Err(SyncError::EmptySpan(format!(
            "{} to {}",
            timestamp::format_datetime(span.global_start),
            timestamp::format_datetime(span.global_end)
        )));
    }

    let chunks = chunk_layout(&span, total, options.chunk_duration);
    let mut entries: Vec<BTreeMap<ModalityId, ChunkPlan>> = vec![BTreeMap::new(); chunks.len()];

    for catalog in catalogs {
        let files: Vec<&SourceFile> = catalog.files.iter().filter(|f| f.duration > 0.0).collect();
        let starts = effective_starts(&files, span.global_start, options);

        let plans = match catalog.frequency() {
            Some(frequency) => plan_regular(&catalog.modality, &files, &starts, &chunks, total, frequency),
            None => plan_irregular(&catalog.modality, &files, &starts, &chunks),
        };
        for (entry, plan) in entries.iter_mut().zip(plans) {
            entry.insert(catalog.modality.clone(), plan);
        }
    }

    tracing::info!(
        "Planned {} chunk(s) of {} s for {} modalities, {} to {}",
        chunks.len(),
        options.chunk_duration,
        catalogs.len(),
        timestamp::format_datetime(span.global_start),
        timestamp::format_datetime(span.global_end)
    );

    Ok(SyncPlan {
        span,
        chunk_duration: options.chunk_duration,
        chunks,
        modalities: catalogs.iter().map(|c| c.modality.clone()).collect(),
        entries,
    })
}

/// Global start is the earliest file start. Global end is the latest
/// modality end (`Longest`) or the earliest one (`Shortest`).
pub fn recording_span(catalogs: &[FileCatalog], policy: EndPolicy) -> Result<RecordingSpan> {
    let global_start = catalogs
        .iter()
        .filter_map(FileCatalog::first_start)
        .min()
        .ok_or_else(|| SyncError::NoData(Vec::new()))?;

    let ends = catalogs.iter().filter_map(FileCatalog::last_end);
    let global_end = match policy {
        EndPolicy::Longest => ends.max(),
        EndPolicy::Shortest => ends.min(),
    }
    .ok_or_else(|| SyncError::NoData(Vec::new()))?;

    Ok(RecordingSpan {
        global_start,
        global_end,
    })
}

fn chunk_layout(span: &RecordingSpan, total: f64, chunk_duration: f64) -> Vec<ChunkInfo> {
    let count = (((total - CHUNK_EPSILON_SECS) / chunk_duration).ceil() as usize).max(1);
    (0..count)
        .map(|index| {
            let offset = index as f64 * chunk_duration;
            ChunkInfo {
                index,
                start: timestamp::offset_by_seconds(span.global_start, offset),
                offset,
                duration: chunk_duration.min(total - offset),
            }
        })
        .collect()
}

/// File starts in seconds since the global start, after drift correction.
///
/// A file starting at most `tolerance` after the end of the previous file is
/// moved back onto it; otherwise a file starting at most `tolerance` after a
/// chunk boundary that no earlier file reaches is moved onto the boundary.
fn effective_starts(files: &[&SourceFile], global_start: DateTime<FixedOffset>, options: &PlanOptions) -> Vec<f64> {
    let mut starts = Vec::with_capacity(files.len());
    let mut previous_end: Option<f64> = None;

    for file in files {
        let declared = timestamp::seconds_between(global_start, file.start_time);
        let mut start = declared;

        match previous_end {
            Some(end) if declared > end && declared - end <= options.tolerance => start = end,
            _ => {
                let boundary = (declared / options.chunk_duration).floor() * options.chunk_duration;
                let uncovered = previous_end.is_none_or(|end| end <= boundary);
                if declared > boundary && declared - boundary <= options.tolerance && uncovered {
                    start = boundary;
                }
            }
        }

        if start != declared {
            tracing::debug!(
                "[{}] {} shifted by {:.3} s",
                file.modality_id,
                file.path.display(),
                start - declared
            );
        }

        let end = start + file.duration;
        previous_end = Some(previous_end.map_or(end, |e| e.max(end)));
        starts.push(start);
    }
    starts
}

fn plan_regular(
    modality: &ModalityId,
    files: &[&SourceFile],
    starts: &[f64],
    chunks: &[ChunkInfo],
    total: f64,
    frequency: f64,
) -> Vec<ChunkPlan> {
    let grid = |secs: f64| -> i64 { (secs * frequency).round() as i64 };
    let file_starts: Vec<i64> = starts.iter().map(|s| grid(*s)).collect();
    let global_samples = grid(total);

    chunks
        .iter()
        .map(|chunk| {
            let chunk_first = grid(chunk.offset);
            let chunk_end = if chunk.index + 1 == chunks.len() {
                global_samples
            } else {
                grid(chunk.offset + chunk.duration)
            };
            let to_secs = |sample: i64| (sample - chunk_first) as f64 / frequency;

            let mut segments = Vec::new();
            let mut cursor = chunk_first;
            for (file, &file_first) in files.iter().zip(&file_starts) {
                let file_end = file_first + file.sample_count as i64;
                if file_end <= cursor || file_first >= chunk_end {
                    continue;
                }
                if file_first > cursor {
                    segments.push(Segment {
                        chunk_offset: to_secs(cursor),
                        duration: (file_first - cursor) as f64 / frequency,
                        kind: SegmentKind::Gap {
                            length: (file_first - cursor) as u64,
                        },
                    });
                    cursor = file_first;
                }
                let end = file_end.min(chunk_end);
                segments.push(Segment {
                    chunk_offset: to_secs(cursor),
                    duration: (end - cursor) as f64 / frequency,
                    kind: SegmentKind::Source {
                        path: file.path.clone(),
                        local_offset: (cursor - file_first) as u64,
                        length: (end - cursor) as u64,
                    },
                });
                cursor = end;
                if cursor >= chunk_end {
                    break;
                }
            }
            if cursor < chunk_end {
                segments.push(Segment {
                    chunk_offset: to_secs(cursor),
                    duration: (chunk_end - cursor) as f64 / frequency,
                    kind: SegmentKind::Gap {
                        length: (chunk_end - cursor) as u64,
                    },
                });
            }

            ChunkPlan {
                chunk_index: chunk.index,
                modality: modality.clone(),
                chunk_start: chunk.start,
                chunk_duration: chunk.duration,
                frequency: Some(frequency),
                sample_count: (chunk_end - chunk_first).max(0) as u64,
                segments,
            }
        })
        .collect()
}

fn plan_irregular(
    modality: &ModalityId,
    files: &[&SourceFile],
    starts: &[f64],
    chunks: &[ChunkInfo],
) -> Vec<ChunkPlan> {
    chunks
        .iter()
        .map(|chunk| {
            let chunk_end = chunk.offset + chunk.duration;
            let mut segments = Vec::new();
            let mut cursor = chunk.offset;

            for (file, &file_start) in files.iter().zip(starts) {
                let file_end = file_start + file.duration;
                if file_end <= cursor || file_start >= chunk_end {
                    continue;
                }
                if file_start > cursor {
                    segments.push(Segment {
                        chunk_offset: cursor - chunk.offset,
                        duration: file_start - cursor,
                        kind: SegmentKind::Gap { length: 0 },
                    });
                    cursor = file_start;
                }
                let end = file_end.min(chunk_end);
                segments.push(Segment {
                    chunk_offset: cursor - chunk.offset,
                    duration: end - cursor,
                    kind: SegmentKind::TimeRange {
                        path: file.path.clone(),
                        local_start: cursor - file_start,
                        local_end: end - file_start,
                        closed_end: end >= file_end,
                    },
                });
                cursor = end;
                if cursor >= chunk_end {
                    break;
                }
            }
            if cursor < chunk_end {
                segments.push(Segment {
                    chunk_offset: cursor - chunk.offset,
                    duration: chunk_end - cursor,
                    kind: SegmentKind::Gap { length: 0 },
                });
            }

            ChunkPlan {
                chunk_index: chunk.index,
                modality: modality.clone(),
                chunk_start: chunk.start,
                chunk_duration: chunk.duration,
                frequency: None,
                sample_count: 0,
                segments,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::utc_offset;
    use std::path::PathBuf;

    fn at(secs: f64) -> DateTime<FixedOffset> {
        let base = timestamp::parse_datetime("2024-01-01T00:00:00", utc_offset()).unwrap();
        timestamp::offset_by_seconds(base, secs)
    }

    fn file(name: &str, start: f64, duration: f64, frequency: f64) -> SourceFile {
        SourceFile {
            path: PathBuf::from(name),
            modality_id: ModalityId::new("m"),
            start_time: at(start),
            sample_count: (duration * frequency).round() as u64,
            frequency,
            duration,
            channels: 1,
        }
    }

    fn options(chunk: f64) -> PlanOptions {
        PlanOptions {
            chunk_duration: chunk,
            ..Default::default()
        }
    }

    #[test]
    fn exact_multiple_does_not_add_empty_chunk() {
        let catalog = FileCatalog::from_files(ModalityId::new("m"), vec![file("a", 0.0, 120.0, 10.0)]).0;
        let plan = plan(&[catalog], &options(60.0)).unwrap();
        assert_eq!(plan.chunk_count(), 2);
        assert!(plan.chunks.iter().all(|c| c.duration == 60.0));
    }

    #[test]
    fn last_chunk_is_truncated() {
        let catalog = FileCatalog::from_files(ModalityId::new("m"), vec![file("a", 0.0, 130.0, 10.0)]).0;
        let plan = plan(&[catalog], &options(60.0)).unwrap();
        assert_eq!(plan.chunk_count(), 3);
        assert!((plan.chunks[2].duration - 10.0).abs() < 1e-9);
        let entry = plan.entry(2, &ModalityId::new("m")).unwrap();
        assert_eq!(entry.sample_count, 100);
        assert_eq!(entry.total_length(), 100);
    }

    #[test]
    fn small_gap_between_files_is_absorbed() {
        let catalog = FileCatalog::from_files(
            ModalityId::new("m"),
            vec![file("a", 0.0, 30.0, 10.0), file("b", 30.6, 30.0, 10.0)],
        )
        .0;
        let plan = plan(&[catalog], &options(60.0)).unwrap();
        let entry = plan.entry(0, &ModalityId::new("m")).unwrap();
        assert!(entry.segments.iter().all(|s| !s.is_gap()), "{:?}", entry.segments);
        assert_eq!(entry.segments.len(), 2);
        assert_eq!(entry.segments[1].chunk_offset, 30.0);
    }

    #[test]
    fn large_gap_between_files_is_kept() {
        let catalog = FileCatalog::from_files(
            ModalityId::new("m"),
            vec![file("a", 0.0, 20.0, 10.0), file("b", 25.0, 35.0, 10.0)],
        )
        .0;
        let plan = plan(&[catalog], &options(60.0)).unwrap();
        let entry = plan.entry(0, &ModalityId::new("m")).unwrap();
        assert_eq!(entry.segments.len(), 3);
        assert_eq!(entry.segments[1].kind, SegmentKind::Gap { length: 50 });
    }

    #[test]
    fn overlapping_file_head_is_trimmed() {
        let catalog = FileCatalog::from_files(
            ModalityId::new("m"),
            vec![file("a", 0.0, 40.0, 10.0), file("b", 30.0, 30.0, 10.0)],
        )
        .0;
        let plan = plan(&[catalog], &options(60.0)).unwrap();
        let entry = plan.entry(0, &ModalityId::new("m")).unwrap();
        assert_eq!(
            entry.segments[1].kind,
            SegmentKind::Source {
                path: PathBuf::from("b"),
                local_offset: 100,
                length: 200
            }
        );
        assert_eq!(entry.total_length(), 600);
    }

    #[test]
    fn file_spanning_chunks_is_split() {
        let catalog = FileCatalog::from_files(ModalityId::new("m"), vec![file("a", 0.0, 90.0, 4.0)]).0;
        let plan = plan(&[catalog], &options(60.0)).unwrap();
        let second = plan.entry(1, &ModalityId::new("m")).unwrap();
        assert_eq!(
            second.segments[0].kind,
            SegmentKind::Source {
                path: PathBuf::from("a"),
                local_offset: 240,
                length: 120
            }
        );
    }

    #[test]
    fn irregular_ranges_close_at_file_end() {
        let catalog = FileCatalog::from_files(ModalityId::new("m"), vec![file("a", 10.0, 20.0, 0.0)]).0;
        let anchor = FileCatalog::from_files(ModalityId::new("v"), vec![file("v", 0.0, 60.0, 25.0)]).0;
        let plan = plan(&[catalog, anchor], &options(60.0)).unwrap();
        let entry = plan.entry(0, &ModalityId::new("m")).unwrap();
        assert_eq!(entry.segments.len(), 3);
        assert!(matches!(
            entry.segments[1].kind,
            SegmentKind::TimeRange { closed_end: true, local_start, local_end, .. }
                if local_start == 0.0 && local_end == 20.0
        ));
        assert!((entry.covered_duration() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn shortest_policy_cuts_at_first_end() {
        let a = FileCatalog::from_files(ModalityId::new("a"), vec![file("a", 0.0, 120.0, 10.0)]).0;
        let b = FileCatalog::from_files(ModalityId::new("b"), vec![file("b", 0.0, 90.0, 10.0)]).0;
        let plan = plan(
            &[a, b],
            &PlanOptions {
                chunk_duration: 60.0,
                end_policy: EndPolicy::Shortest,
                tolerance: 1.0,
            },
        )
        .unwrap();
        assert!((plan.span.duration_secs() - 90.0).abs() < 1e-9);
        assert!(plan.entry(1, &ModalityId::new("b")).unwrap().segments.iter().all(|s| !s.is_gap()));
    }

    #[test]
    fn modality_starting_after_the_end_is_all_gap() {
        let a = FileCatalog::from_files(ModalityId::new("a"), vec![file("a", 100.0, 10.0, 10.0)]).0;
        let b = FileCatalog::from_files(ModalityId::new("b"), vec![file("b", 0.0, 50.0, 10.0)]).0;
        let plan = plan(
            &[a, b],
            &PlanOptions {
                end_policy: EndPolicy::Shortest,
                ..options(60.0)
            },
        )
        .unwrap();
        assert!((plan.span.duration_secs() - 50.0).abs() < 1e-9);
        let entry = plan.entry(0, &ModalityId::new("a")).unwrap();
        assert!(entry.is_all_gap());
        assert_eq!(entry.total_length(), 500);
    }

    #[test]
    fn empty_catalogs_are_all_reported() {
        let a = FileCatalog::from_files(ModalityId::new("a"), Vec::new()).0;
        let b = FileCatalog::from_files(ModalityId::new("b"), Vec::new()).0;
        let c = FileCatalog::from_files(ModalityId::new("c"), vec![file("c", 0.0, 5.0, 10.0)]).0;
        match plan(&[a, b, c], &options(60.0)) {
            Err(SyncError::NoData(ids)) => assert_eq!(ids, vec!["a".to_string(), "b".to_string()]),
            other => panic!("expected NoData, got {:?}", other),
        }
    }

    fn late_start(offset: f64) -> SyncPlan {
        let anchor = FileCatalog::from_files(ModalityId::new("v"), vec![file("v", 0.0, 120.0, 10.0)]).0;
        let late = FileCatalog::from_files(
            ModalityId::new("m"),
            vec![file("m", 60.0 + offset, 60.0 - offset, 10.0)],
        )
        .0;
        plan(&[anchor, late], &options(60.0)).unwrap()
    }

    #[test]
    fn start_just_after_a_chunk_boundary_snaps_onto_it() {
        let plan = late_start(0.6);
        assert!(plan.entry(0, &ModalityId::new("m")).unwrap().is_all_gap());
        let entry = plan.entry(1, &ModalityId::new("m")).unwrap();
        assert_eq!(entry.segments[0].chunk_offset, 0.0);
        assert_eq!(
            entry.segments[0].kind,
            SegmentKind::Source {
                path: PathBuf::from("m"),
                local_offset: 0,
                length: 594
            }
        );
        assert_eq!(entry.total_length(), 600);
    }

    #[test]
    fn start_beyond_the_tolerance_keeps_its_gap() {
        let plan = late_start(1.5);
        let entry = plan.entry(1, &ModalityId::new("m")).unwrap();
        assert_eq!(entry.segments[0].kind, SegmentKind::Gap { length: 15 });
        assert_eq!(entry.segments[1].chunk_offset, 1.5);
        assert!(matches!(
            entry.segments[1].kind,
            SegmentKind::Source { local_offset: 0, length: 585, .. }
        ));
        assert_eq!(entry.total_length(), 600);
    }
}
