//! Navigation over a synthetic recording opened through a session.

mod common;

use anyhow::{Context, Result};
use longrec_toolbox::catalog::ModalityId;
use longrec_toolbox::navigation::loader::ChunkBuffer;
use longrec_toolbox::navigation::{NavState, NavigationController, NavigationEvent, Step, WindowSlice};
use longrec_toolbox::planner::SyncPlan;
use longrec_toolbox::session::{self, Session};
use longrec_toolbox::synth;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

fn open(dir: &tempfile::TempDir) -> Result<Session> {
    let config = common::write_small_demo(dir.path())?;
    let mut session = Session::open(config)?;
    assert!(session.controller.wait_until_ready(TIMEOUT));
    Ok(session)
}

fn id(name: &str) -> ModalityId {
    ModalityId::new(name)
}

#[test]
fn session_opens_on_the_first_chunk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let session = open(&dir)?;
    let controller = &session.controller;

    assert!(session.issues.is_empty(), "{:?}", session.issues);
    assert_eq!(session.plan.chunk_count(), 3);
    assert_eq!(session.plan.span.global_start, common::at(0.0));
    assert_eq!(session.plan.span.global_end, common::at(22.0));
    assert_eq!(controller.reference().modality, Some(id("camera")));
    assert_eq!(controller.reference().frequency, 10.0);
    assert_eq!(controller.chunk_sample_count(0), 100);
    assert_eq!(controller.chunk_sample_count(2), 20);

    assert_eq!(controller.loaded_chunk(), Some(0));
    assert_eq!(controller.state(), NavState::Stopped);
    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (0, 0));
    assert_eq!(cursor.absolute_time, common::at(0.0));
    assert!(controller.open_handles() > 0);
    Ok(())
}

#[test]
fn display_window_fills_leading_gaps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let session = open(&dir)?;
    let window = session.controller.get_display_window().unwrap();

    assert_eq!(window.chunk_index, 0);
    assert_eq!(window.modalities.len(), 5);
    match &window.modalities[&id("ecg")] {
        WindowSlice::Signal { frequency, values, .. } => {
            assert_eq!(*frequency, 50.0);
            assert!(values.nrows() > 0);
            // the signal files start 2 s after the video
            assert!(values[[0, 0]].is_nan());
        }
        other => panic!("ecg is {:?}", other),
    }
    match &window.modalities[&id("camera")] {
        WindowSlice::Frames { frames, .. } => assert!(frames.iter().all(Option::is_some)),
        other => panic!("camera is {:?}", other),
    }
    assert!(matches!(window.modalities[&id("resp")], WindowSlice::Timed { .. }));

    // past the lag the signal has data
    match session.controller.chunk_buffer(&id("ecg")) {
        Some(ChunkBuffer::Signal { values, .. }) => {
            assert_eq!(values.nrows(), 500);
            assert!(values[[99, 0]].is_nan());
            assert!(values[[100, 0]].is_finite());
        }
        other => panic!("ecg buffer is {:?}", other),
    }
    Ok(())
}

#[test]
fn p3_cursor_round_trips_through_absolute_time() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    for (chunk, sample) in [(0, 0), (0, 57), (1, 0), (1, 99), (2, 13), (2, 19)] {
        controller.seek_to_position(chunk, sample);
        assert!(controller.wait_until_ready(TIMEOUT));
        let cursor = controller.cursor();
        assert_eq!((cursor.chunk_index, cursor.sample_index), (chunk, sample));
        assert_eq!(controller.current_time(), cursor.absolute_time);
        assert_eq!(controller.time_of(chunk, sample), Some(cursor.absolute_time));
        assert_eq!(controller.position_of(cursor.absolute_time), (chunk, sample));

        controller.seek_to_time(cursor.absolute_time);
        assert!(controller.wait_until_ready(TIMEOUT));
        assert_eq!(controller.cursor(), cursor);
    }
    assert_eq!(controller.time_of(2, 20), None);
    assert_eq!(controller.time_of(3, 0), None);
    Ok(())
}

#[test]
fn p5_seeking_outside_the_recording_clamps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    controller.seek_to_time(common::at(15.0));
    assert!(controller.wait_until_ready(TIMEOUT));
    controller.seek_to_time(common::at(-0.001));
    assert!(controller.wait_until_ready(TIMEOUT));
    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (0, 0));
    assert_eq!(cursor.absolute_time, common::at(0.0));

    controller.seek_to_time(common::at(22.001));
    assert!(controller.wait_until_ready(TIMEOUT));
    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (2, 19));
    assert_eq!(cursor.absolute_time, common::at(21.9));

    controller.seek_to_time(common::at(22.0));
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.cursor(), cursor);
    Ok(())
}

#[test]
fn stepping_crosses_chunk_boundaries() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    controller.seek_to_position(0, 99);
    assert!(controller.wait_until_ready(TIMEOUT));
    controller.step(Step::Samples(1));
    assert!(controller.wait_until_ready(TIMEOUT));
    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (1, 0));
    assert_eq!(controller.loaded_chunk(), Some(1));

    controller.step(Step::Seconds(-0.5));
    assert!(controller.wait_until_ready(TIMEOUT));
    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (0, 95));

    // stepping before the start clamps
    controller.step(Step::Seconds(-100.0));
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.cursor().absolute_time, common::at(0.0));
    Ok(())
}

#[test]
fn moving_inside_the_resident_chunk_does_not_reload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;
    let events = controller.subscribe();

    controller.step(Step::Samples(5));
    assert!(!controller.is_loading());
    assert_eq!(controller.cursor().sample_index, 5);
    controller.seek_to_time(common::at(7.0));
    assert!(!controller.is_loading());
    assert_eq!(controller.cursor().sample_index, 70);
    assert!(controller.get_display_window().is_some());

    let received: Vec<_> = events.try_iter().collect();
    assert!(received
        .iter()
        .all(|e| !matches!(e, NavigationEvent::ChunkReady(_) | NavigationEvent::ChunkChanged { .. })));
    assert_eq!(
        received
            .iter()
            .filter(|e| matches!(e, NavigationEvent::CursorChanged(_)))
            .count(),
        2
    );
    Ok(())
}

#[test]
fn display_window_is_withheld_while_a_chunk_loads() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    assert!(controller.set_chunk(1));
    assert!(controller.is_loading());
    assert_eq!(controller.state(), NavState::Seeking);
    assert!(controller.get_display_window().is_none());
    // the committed cursor stays until the data is there
    assert_eq!(controller.cursor().chunk_index, 0);
    assert_eq!(controller.target().chunk_index, 1);

    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.state(), NavState::Stopped);
    let window = controller.get_display_window().unwrap();
    assert_eq!(window.chunk_index, 1);
    assert_eq!(window.start_time, common::at(10.0));
    Ok(())
}

#[test]
fn latest_chunk_request_wins() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;
    let events = controller.subscribe();

    controller.set_chunk(1);
    controller.set_chunk(2);
    controller.step(Step::Samples(3));
    assert!(controller.wait_until_ready(TIMEOUT));

    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (2, 3));
    assert_eq!(controller.loaded_chunk(), Some(2));

    let changes: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            NavigationEvent::ChunkChanged { current, .. } => Some(current),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![2]);
    Ok(())
}

#[test]
fn returning_to_the_resident_chunk_drops_the_pending_load() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    controller.set_chunk(1);
    assert!(controller.is_loading());
    controller.seek_to_position(0, 10);
    assert!(!controller.is_loading());
    assert_eq!(controller.state(), NavState::Stopped);
    assert_eq!(controller.cursor().sample_index, 10);

    // a late result of the dropped request changes nothing
    std::thread::sleep(Duration::from_millis(200));
    controller.poll();
    assert_eq!(controller.loaded_chunk(), Some(0));
    assert_eq!(controller.cursor().chunk_index, 0);
    Ok(())
}

#[test]
fn out_of_range_chunk_is_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;
    let events = controller.subscribe();

    assert!(!controller.set_chunk(3));
    assert!(!controller.is_loading());
    assert!(matches!(events.try_recv(), Ok(NavigationEvent::Warning(_))));
    assert!(!controller.previous_chunk());
    Ok(())
}

#[test]
fn unreadable_file_becomes_a_gap_with_a_warning() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;
    let events = controller.subscribe();

    let second_ecg = dir
        .path()
        .join("ecg")
        .join(synth::file_name("ecg", common::at(12.0), "txt"));
    std::fs::remove_file(&second_ecg)?;

    controller.set_chunk(1);
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.loaded_chunk(), Some(1));
    assert_eq!(controller.state(), NavState::Stopped);

    let warnings: Vec<String> = events
        .try_iter()
        .filter_map(|e| match e {
            NavigationEvent::Warning(message) => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("ecg"));

    match controller.chunk_buffer(&id("ecg")) {
        Some(ChunkBuffer::Signal { values, .. }) => {
            assert_eq!(values.nrows(), 500);
            assert!(values.iter().all(|v| v.is_nan()));
        }
        other => panic!("ecg buffer is {:?}", other),
    }
    // the other modalities are unaffected
    match controller.chunk_buffer(&id("eeg")) {
        Some(ChunkBuffer::Signal { values, .. }) => assert!(values[[300, 0]].is_finite()),
        other => panic!("eeg buffer is {:?}", other),
    }
    Ok(())
}

#[test]
fn truncated_file_keeps_its_remaining_samples() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;
    let events = controller.subscribe();

    // the second ecg file covers chunk 1 from 2 s on; keep half of its rows
    let second_ecg = dir
        .path()
        .join("ecg")
        .join(synth::file_name("ecg", common::at(12.0), "txt"));
    let contents = std::fs::read_to_string(&second_ecg)?;
    let rows: Vec<&str> = contents.lines().collect();
    assert_eq!(rows.len(), 500);
    std::fs::write(&second_ecg, format!("{}\n", rows[..250].join("\n")))?;

    assert!(controller.set_chunk(1));
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.loaded_chunk(), Some(1));

    let warnings: Vec<String> = events
        .try_iter()
        .filter_map(|e| match e {
            NavigationEvent::Warning(message) => Some(message),
            NavigationEvent::ChunkLoadFailed { message, .. } => panic!("chunk load failed: {}", message),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("ecg") && warnings[0].contains("150"), "{}", warnings[0]);

    match controller.chunk_buffer(&id("ecg")) {
        Some(ChunkBuffer::Signal { values, .. }) => {
            assert_eq!(values.nrows(), 500);
            // 2 s from the first file, then 250 rows of the truncated one
            assert!(values.slice(ndarray::s![..350, ..]).iter().all(|v| v.is_finite()));
            assert!(values.slice(ndarray::s![350.., ..]).iter().all(|v| v.is_nan()));
        }
        other => panic!("ecg buffer is {:?}", other),
    }
    match controller.chunk_buffer(&id("eeg")) {
        Some(ChunkBuffer::Signal { values, .. }) => assert!(values[[450, 0]].is_finite()),
        other => panic!("eeg buffer is {:?}", other),
    }
    assert!(controller.get_display_window().is_some());
    Ok(())
}

#[test]
fn failed_chunk_load_leaves_the_cursor_where_it_was() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = common::write_small_demo(dir.path())?;
    let layout = session::build_layout(&config)?;
    let sources = session::modality_sources(&config, &layout.catalogs);

    // chunk 1 of ecg asks a regular reader for a time range
    let mut plan = serde_json::to_value(&layout.plan)?;
    let segments = plan["entries"][1]["ecg"]["segments"]
        .as_array_mut()
        .context("ecg segments of chunk 1")?;
    let segment = segments
        .iter_mut()
        .find(|s| s["kind"]["type"] == "source")
        .context("ecg source segment")?;
    let path = segment["kind"]["path"].clone();
    segment["kind"] = serde_json::json!({
        "type": "time_range",
        "path": path,
        "local_start": 0.0,
        "local_end": 1.0,
        "closed_end": false,
    });
    let plan: SyncPlan = serde_json::from_value(plan)?;

    let mut controller = NavigationController::new(
        Arc::new(plan),
        sources,
        layout.reference,
        config.window_duration_secs,
        config.zoom_factor,
    )?;
    assert!(controller.wait_until_ready(TIMEOUT));
    controller.seek_to_position(0, 42);
    assert!(controller.wait_until_ready(TIMEOUT));
    let before = controller.cursor();
    let events = controller.subscribe();

    assert!(controller.set_chunk(1));
    assert!(controller.wait_until_ready(TIMEOUT));

    assert_eq!(controller.cursor(), before);
    assert_eq!(controller.loaded_chunk(), Some(0));
    assert_eq!(controller.state(), NavState::Stopped);
    assert!(controller.get_display_window().is_some());
    let failures: Vec<(usize, String)> = events
        .try_iter()
        .filter_map(|e| match e {
            NavigationEvent::ChunkLoadFailed { chunk_index, message } => Some((chunk_index, message)),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, 1);
    assert!(failures[0].1.contains("ecg"), "{}", failures[0].1);

    // the recording stays navigable
    assert!(controller.set_chunk(2));
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.loaded_chunk(), Some(2));
    Ok(())
}

#[test]
fn playback_advances_and_stops_at_the_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    controller.play();
    assert_eq!(controller.state(), NavState::Playing);
    controller.tick(Duration::from_millis(500));
    assert_eq!(controller.cursor().sample_index, 5);
    controller.tick(Duration::from_millis(50));
    controller.tick(Duration::from_millis(50));
    assert_eq!(controller.cursor().sample_index, 6);
    controller.pause();
    assert_eq!(controller.state(), NavState::Stopped);
    controller.tick(Duration::from_secs(1));
    assert_eq!(controller.cursor().sample_index, 6);

    controller.seek_to_position(2, 15);
    assert!(controller.wait_until_ready(TIMEOUT));
    controller.play();
    controller.tick(Duration::from_secs(2));
    assert!(controller.wait_until_ready(TIMEOUT));
    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (2, 19));
    assert_eq!(controller.state(), NavState::Stopped);
    Ok(())
}

#[test]
fn playing_through_a_chunk_boundary_resumes_after_loading() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    controller.seek_to_position(0, 98);
    assert!(controller.wait_until_ready(TIMEOUT));
    controller.play();
    controller.tick(Duration::from_millis(500));
    assert_eq!(controller.state(), NavState::Seeking);
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.state(), NavState::Playing);
    let cursor = controller.cursor();
    assert_eq!((cursor.chunk_index, cursor.sample_index), (1, 3));
    Ok(())
}

#[test]
fn window_follows_zoom_and_cursor() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;

    controller.set_window_duration(2.0);
    assert_eq!(controller.window_range(), (0.0, 2.0));

    // leaving the window pages it by its own width
    controller.seek_to_position(0, 25);
    assert_eq!(controller.window_range(), (2.0, 2.0));
    // far away it jumps to the cursor
    controller.seek_to_position(0, 80);
    assert_eq!(controller.window_range(), (8.0, 2.0));

    controller.zoom_in();
    let (start, width) = controller.window_range();
    assert!((width - 1.0).abs() < 0.11);
    assert!(start <= 8.0 && 8.0 <= start + width);

    controller.show_all();
    assert_eq!(controller.window_range(), (0.0, 10.0));
    controller.zoom_out();
    assert_eq!(controller.window_range(), (0.0, 10.0));

    // a window wider than the short last chunk is cut to it
    controller.set_chunk(2);
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.window_range(), (0.0, 2.0));
    Ok(())
}

#[test]
fn video_frame_at_the_cursor() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    let controller = &mut session.controller;
    let camera = id("camera");

    controller.seek_to_position(1, 3);
    assert!(controller.wait_until_ready(TIMEOUT));
    assert_eq!(controller.current_frame_index(&camera), Some((1, 3)));
    let frame = controller.current_frame(&camera).unwrap();
    assert_eq!(frame.frame_index, 3);
    assert!(frame.path.ends_with(synth::file_name("camera", common::at(10.0), "mp4")));
    let bytes = controller.current_frame_bytes(&camera)?.unwrap();
    assert!(!bytes.is_empty());

    // ecg runs at 50 Hz: 10.3 s is sample 15 of chunk 1
    assert_eq!(controller.current_frame_index(&id("ecg")), Some((1, 15)));
    assert_eq!(controller.current_frame_index(&id("resp")), None);

    // no video after 20 s
    controller.set_chunk(2);
    assert!(controller.wait_until_ready(TIMEOUT));
    assert!(controller.current_frame(&camera).is_none());
    Ok(())
}
