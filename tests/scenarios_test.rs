//! Planning scenarios and properties on hand-built catalogs.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use longrec_toolbox::catalog::{FileCatalog, ModalityId, SourceFile};
use longrec_toolbox::config::{utc_offset, EndPolicy, TimestampConfig};
use longrec_toolbox::planner::{self, PlanOptions, SegmentKind, SyncPlan};
use longrec_toolbox::timestamp;
use std::path::{Path, PathBuf};

fn at(seconds: f64) -> DateTime<FixedOffset> {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .map(|t| t.fixed_offset())
        .unwrap();
    timestamp::offset_by_seconds(base, seconds)
}

fn source(modality: &str, name: &str, start: f64, duration: f64, frequency: f64) -> SourceFile {
    SourceFile {
        path: PathBuf::from(name),
        modality_id: ModalityId::new(modality),
        start_time: at(start),
        sample_count: (duration * frequency).round() as u64,
        frequency,
        duration,
        channels: 1,
    }
}

fn catalog(modality: &str, files: Vec<SourceFile>) -> FileCatalog {
    FileCatalog::from_files(ModalityId::new(modality), files).0
}

fn plan_with(catalogs: &[FileCatalog], chunk: f64, end_policy: EndPolicy) -> Result<SyncPlan> {
    let options = PlanOptions {
        chunk_duration: chunk,
        end_policy,
        tolerance: 1.0,
    };
    Ok(planner::plan(catalogs, &options)?)
}

#[test]
fn scenario_a_back_to_back_videos() -> Result<()> {
    let bw1 = catalog(
        "BW1",
        vec![
            source("BW1", "bw1_a.mp4", 0.0, 1800.0, 25.0),
            source("BW1", "bw1_b.mp4", 1800.0, 1800.0, 25.0),
            source("BW1", "bw1_c.mp4", 3600.0, 1800.0, 25.0),
        ],
    );
    let plan = plan_with(&[bw1], 1800.0, EndPolicy::Longest)?;

    assert_eq!(plan.chunk_count(), 3);
    for (index, name) in ["bw1_a.mp4", "bw1_b.mp4", "bw1_c.mp4"].iter().enumerate() {
        let entry = plan.entry(index, &ModalityId::new("BW1")).unwrap();
        assert_eq!(entry.segments.len(), 1, "chunk {}", index);
        assert!(entry.gap_duration() == 0.0);
        match &entry.segments[0].kind {
            SegmentKind::Source {
                path,
                local_offset,
                length,
            } => {
                assert_eq!(path, Path::new(name));
                assert_eq!(*local_offset, 0);
                assert_eq!(*length, 45_000);
            }
            other => panic!("unexpected segment {:?}", other),
        }
    }
    Ok(())
}

#[test]
fn scenario_b_short_file_leaves_trailing_gap() -> Result<()> {
    let ecg = catalog("ECG", vec![source("ECG", "ecg.txt", 0.0, 50.0, 100.0)]);
    // a longer modality keeps the recording going into a second chunk
    let video = catalog("video", vec![source("video", "cam.mp4", 0.0, 120.0, 25.0)]);
    let plan = plan_with(&[ecg, video], 60.0, EndPolicy::Longest)?;
    assert_eq!(plan.chunk_count(), 2);

    let first = plan.entry(0, &ModalityId::new("ECG")).unwrap();
    assert_eq!(first.segments.len(), 2);
    assert!(!first.segments[0].is_gap());
    assert_eq!(first.segments[0].length(), 5000);
    assert!((first.segments[0].duration - 50.0).abs() < 1e-9);
    assert!(first.segments[1].is_gap());
    assert_eq!(first.segments[1].length(), 1000);
    assert!((first.segments[1].duration - 10.0).abs() < 1e-9);

    let second = plan.entry(1, &ModalityId::new("ECG")).unwrap();
    assert!(second.is_all_gap());
    assert_eq!(second.total_length(), 6000);
    Ok(())
}

#[test]
fn scenario_c_longest_policy_extends_to_last_end() -> Result<()> {
    let video = catalog("video", vec![source("video", "cam.mp4", 0.0, 120.0, 25.0)]);
    let signal = catalog("signal", vec![source("signal", "sig.txt", 0.0, 90.0, 100.0)]);
    let plan = plan_with(&[video, signal], 60.0, EndPolicy::Longest)?;

    assert_eq!(plan.span.global_end, at(120.0));
    let last = plan.entry(1, &ModalityId::new("signal")).unwrap();
    let gap = last.segments.last().unwrap();
    assert!(gap.is_gap());
    assert!((gap.duration - 30.0).abs() < 1e-9);
    assert!((gap.chunk_offset - 30.0).abs() < 1e-9);
    assert!((last.gap_duration() - 30.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn shortest_policy_stops_at_first_end() -> Result<()> {
    let video = catalog("video", vec![source("video", "cam.mp4", 0.0, 120.0, 25.0)]);
    let signal = catalog("signal", vec![source("signal", "sig.txt", 0.0, 90.0, 100.0)]);
    let plan = plan_with(&[video, signal], 60.0, EndPolicy::Shortest)?;

    assert_eq!(plan.span.global_end, at(90.0));
    assert_eq!(plan.chunk_count(), 2);
    assert!((plan.chunks[1].duration - 30.0).abs() < 1e-9);
    let last = plan.entry(1, &ModalityId::new("signal")).unwrap();
    assert_eq!(last.gap_duration(), 0.0);
    Ok(())
}

#[test]
fn scenario_d_timestamp_from_file_name() -> Result<()> {
    let config = TimestampConfig {
        delimiter: Some("_".to_string()),
        position: Some(2),
        format: Some("%Y-%m-%dT%H-%M-%S".to_string()),
    };
    let resolved = timestamp::resolve(
        Path::new("data_15_2021-03-02T09-33-56.h5"),
        &config,
        utc_offset(),
    )?;
    let expected = Utc
        .with_ymd_and_hms(2021, 3, 2, 9, 33, 56)
        .single()
        .unwrap()
        .fixed_offset();
    assert_eq!(resolved, expected);
    Ok(())
}

#[test]
fn p2_segments_tile_every_chunk() -> Result<()> {
    let catalogs = vec![
        // late start, hole between files, overlapping third file
        catalog(
            "ecg",
            vec![
                source("ecg", "e1.txt", 3.5, 40.0, 100.0),
                source("ecg", "e2.txt", 55.0, 30.0, 100.0),
                source("ecg", "e3.txt", 80.0, 60.0, 100.0),
            ],
        ),
        catalog(
            "video",
            vec![
                source("video", "v1.mp4", 0.0, 70.0, 30.0),
                source("video", "v2.mp4", 70.4, 90.0, 30.0),
            ],
        ),
        catalog("resp", vec![source("resp", "r1.csv", 10.0, 45.0, 0.0)]),
    ];
    let plan = plan_with(&catalogs, 25.0, EndPolicy::Longest)?;
    assert!(plan.chunk_count() > 1);

    for ((chunk_index, modality), entry) in plan.entries() {
        let chunk = &plan.chunks[chunk_index];
        let mut offset = 0.0;
        for segment in &entry.segments {
            assert!(
                (segment.chunk_offset - offset).abs() < 1e-6,
                "{} chunk {}: segment at {} expected {}",
                modality,
                chunk_index,
                segment.chunk_offset,
                offset
            );
            assert!(segment.duration > 0.0);
            offset += segment.duration;
        }
        let period = entry.frequency.map_or(1e-6, |f| 1.0 / f);
        assert!(
            (offset - chunk.duration).abs() <= period,
            "{} chunk {}: covered {} of {}",
            modality,
            chunk_index,
            offset,
            chunk.duration
        );
        if entry.frequency.is_some() {
            assert_eq!(entry.total_length(), entry.sample_count);
        }
    }
    Ok(())
}

#[test]
fn p4_resolver_is_deterministic() -> Result<()> {
    let config = TimestampConfig {
        delimiter: Some("_".to_string()),
        position: Some(1),
        format: Some("%Y-%m-%dT%H-%M-%S".to_string()),
    };
    let names = [
        "cam_2021-03-02T09-33-56.mp4",
        "cam_2021-03-02T10-03-56.mp4",
        "cam_1999-12-31T23-59-59.mp4",
    ];
    let first: Vec<_> = names
        .iter()
        .map(|n| timestamp::resolve(Path::new(n), &config, utc_offset()))
        .collect::<Result<_, _>>()?;

    for round in 0..5 {
        for i in (0..names.len()).rev() {
            let again = timestamp::resolve(Path::new(names[i]), &config, utc_offset())?;
            assert_eq!(again, first[i], "round {} name {}", round, names[i]);
        }
    }
    Ok(())
}
