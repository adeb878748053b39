//! File catalogs built from synthetic files on disk.

mod common;

use anyhow::Result;
use longrec_toolbox::catalog::{FileCatalog, SourceFile};
use longrec_toolbox::config::{
    utc_offset, FrequencySpec, ModalityConfig, ModalityKind, SignalShape,
};
use longrec_toolbox::synth;
use std::path::Path;

fn ecg_modality(directory: &Path) -> ModalityConfig {
    ModalityConfig {
        id: "ecg".to_string(),
        kind: ModalityKind::Signal,
        directory: directory.to_path_buf(),
        pattern: "ecg_*.txt".to_string(),
        timestamp: synth::file_name_timestamp(),
        key: None,
        frequency: Some(FrequencySpec::Value(20.0)),
        shape: SignalShape::RegularVector,
        required: true,
    }
}

#[test]
fn p1_catalog_is_sorted_whatever_the_creation_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for seconds in [30.0, 0.0, 20.0, 10.0] {
        let name = synth::file_name("ecg", common::at(seconds), "txt");
        synth::write_regular_text(&dir.path().join(name), 20.0, 10.0, 1)?;
    }

    let build = FileCatalog::build(&ecg_modality(dir.path()), utc_offset(), None)?;
    assert!(build.issues.is_empty(), "{:?}", build.issues);
    let starts: Vec<_> = build.catalog.files.iter().map(|f| f.start_time).collect();
    assert_eq!(starts.len(), 4);
    assert!(starts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(starts[0], common::at(0.0));
    assert_eq!(build.catalog.frequency(), Some(20.0));
    assert_eq!(build.catalog.files[0].sample_count, 200);
    assert!((build.catalog.files[0].duration - 10.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn bad_files_are_excluded_and_reported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    synth::write_regular_text(&dir.path().join(synth::file_name("ecg", common::at(0.0), "txt")), 20.0, 5.0, 1)?;
    synth::write_regular_text(&dir.path().join("ecg_not-a-time.txt"), 20.0, 5.0, 1)?;
    std::fs::write(dir.path().join(synth::file_name("ecg", common::at(60.0), "txt")), "")?;

    let build = FileCatalog::build(&ecg_modality(dir.path()), utc_offset(), None)?;
    assert_eq!(build.catalog.len(), 1);
    assert_eq!(build.issues.len(), 2);
    assert!(build.issues.iter().all(|i| i.excluded && i.path.is_some()));
    assert!(build
        .issues
        .iter()
        .any(|i| i.path.as_deref().is_some_and(|p| p.ends_with("ecg_not-a-time.txt"))));
    Ok(())
}

#[test]
fn overlapping_files_are_kept_with_a_warning() -> Result<()> {
    let dir = tempfile::tempdir()?;
    synth::write_regular_text(&dir.path().join(synth::file_name("ecg", common::at(0.0), "txt")), 20.0, 10.0, 1)?;
    synth::write_regular_text(&dir.path().join(synth::file_name("ecg", common::at(5.0), "txt")), 20.0, 10.0, 1)?;

    let build = FileCatalog::build(&ecg_modality(dir.path()), utc_offset(), None)?;
    assert_eq!(build.catalog.len(), 2);
    assert_eq!(build.issues.len(), 1);
    assert!(!build.issues[0].excluded);
    Ok(())
}

#[test]
fn frequency_follows_the_reference_when_asked() -> Result<()> {
    let dir = tempfile::tempdir()?;
    synth::write_regular_text(&dir.path().join(synth::file_name("ecg", common::at(0.0), "txt")), 25.0, 4.0, 1)?;
    let mut config = ecg_modality(dir.path());
    config.frequency = Some(FrequencySpec::Value(FrequencySpec::SAME_AS_REFERENCE));

    let unresolved = FileCatalog::build(&config, utc_offset(), None)?;
    assert!(unresolved.catalog.is_empty());
    assert_eq!(unresolved.issues.len(), 1);

    let build = FileCatalog::build(&config, utc_offset(), Some(25.0))?;
    assert_eq!(build.catalog.frequency(), Some(25.0));
    assert!((build.catalog.files[0].duration - 4.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn every_demo_modality_is_cataloged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = common::write_small_demo(dir.path())?;

    for modality in &config.modalities {
        let build = FileCatalog::build(modality, utc_offset(), Some(10.0))?;
        assert!(build.issues.is_empty(), "{}: {:?}", modality.id, build.issues);
        assert_eq!(build.catalog.len(), 2, "{}", modality.id);
        let file = &build.catalog.files[0];
        assert!((file.duration - 10.0).abs() < 0.1, "{} lasts {}", modality.id, file.duration);
        match modality.id.as_str() {
            "camera" => assert_eq!(file.frequency, 10.0),
            "ecg" | "eeg" => assert_eq!(file.frequency, 50.0),
            "audio" => assert_eq!(file.frequency, 800.0),
            "resp" => assert!(file.is_irregular()),
            other => panic!("unexpected modality {}", other),
        }
    }
    Ok(())
}

#[test]
fn ntsc_video_files_share_one_frame_rate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // 29.97 fps: 1001 ticks of a 30000 Hz clock per frame
    for (seconds, frames) in [(0.0, 1798), (60.0, 1800), (120.0, 1799)] {
        let name = synth::file_name("cam", common::at(seconds), "mp4");
        synth::write_mp4_frames(&dir.path().join(name), 30000, 1001, frames)?;
    }
    let config = ModalityConfig {
        id: "cam".to_string(),
        kind: ModalityKind::Video,
        directory: dir.path().to_path_buf(),
        pattern: "cam_*.mp4".to_string(),
        timestamp: synth::file_name_timestamp(),
        key: None,
        frequency: None,
        shape: SignalShape::RegularVector,
        required: true,
    };

    let build = FileCatalog::build(&config, utc_offset(), None)?;
    assert!(build.issues.iter().all(|i| !i.excluded), "{:?}", build.issues);
    assert_eq!(build.catalog.len(), 3);

    let fps = build.catalog.frequency().expect("one frame rate");
    assert!((fps - 30000.0 / 1001.0).abs() < 1e-3, "fps {}", fps);
    for file in &build.catalog.files {
        assert_eq!(file.frequency, fps);
        assert!((file.duration - file.sample_count as f64 / fps).abs() < 1e-9);
    }
    assert_eq!(build.catalog.files[1].sample_count, 1800);
    Ok(())
}

#[test]
fn file_at_another_rate_is_planned_on_the_first_rate() {
    let file = |seconds: f64, frequency: f64| SourceFile {
        path: format!("ecg_{}.txt", seconds).into(),
        modality_id: "ecg".into(),
        start_time: common::at(seconds),
        sample_count: 200,
        frequency,
        duration: 200.0 / frequency,
        channels: 1,
    };
    let (catalog, issues) =
        FileCatalog::from_files("ecg".into(), vec![file(0.0, 20.0), file(10.0, 20.0 * (1.0 + 1e-9)), file(20.0, 40.0)]);

    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.frequency(), Some(20.0));
    assert!(catalog.files.iter().all(|f| (f.duration - 10.0).abs() < 1e-9));
    // only the file at 40 Hz is reported, and it stays in the catalog
    assert_eq!(issues.len(), 1);
    assert!(!issues[0].excluded);
    assert!(issues[0].message.contains("40"));
}
