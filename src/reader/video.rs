use mp4::{Mp4Reader, TrackType};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{FrameRef, ModalityReader, ProbeInfo, SampleRate, WindowData, check_window};
use crate::error::{Result, SyncError};

/// MP4 container with one video track.
///
/// Only the `moov` header is parsed: frame count and rate come from the
/// sample table. Windows are returned as frame handles, and the compressed
/// sample of a frame can be fetched with [`ModalityReader::read_frame_bytes`].
pub struct Mp4VideoReader {
    path: PathBuf,
    mp4_reader: Mp4Reader<BufReader<File>>,
    track_id: u32,
    sample_count: u32,
    fps: f64,
}

impl Mp4VideoReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
        let size = file.metadata().map_err(|e| SyncError::io(path, e))?.len();
        let mp4_reader =
            Mp4Reader::read_header(BufReader::new(file), size).map_err(|e| mp4_error(path, e))?;

        let mut video_track = None;
        for (track_id, track) in mp4_reader.tracks().iter() {
            // ignore audio, subtitles, ...
            if matches!(track.track_type(), Ok(TrackType::Video)) {
                if video_track.is_some() {
                    return Err(SyncError::unsupported(path, "more than one video track"));
                }
                let duration = track.duration().as_secs_f64();
                let fps = if duration > 0.0 {
                    track.sample_count() as f64 / duration
                } else {
                    0.0
                };
                video_track = Some((*track_id, fps));
            }
        }
        let (track_id, fps) =
            video_track.ok_or_else(|| SyncError::unsupported(path, "no video track"))?;

        let sample_count = mp4_reader
            .sample_count(track_id)
            .map_err(|e| mp4_error(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            mp4_reader,
            track_id,
            sample_count,
            fps,
        })
    }
}

fn mp4_error(path: &Path, error: mp4::Error) -> SyncError {
    match error {
        mp4::Error::IoError(e) => SyncError::io(path, e),
        other => SyncError::decode(path, other),
    }
}

impl ModalityReader for Mp4VideoReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn probe(&mut self) -> Result<ProbeInfo> {
        Ok(ProbeInfo {
            sample_count: self.sample_count as u64,
            rate: SampleRate::Regular(self.fps),
            channels: 1,
            duration_hint: None,
        })
    }

    fn read_window(&mut self, start: u64, length: u64) -> Result<WindowData> {
        check_window(&self.path, start, length, self.sample_count as u64)?;
        Ok(WindowData::Frames(
            (start..start + length)
                .map(|frame_index| FrameRef {
                    path: self.path.clone(),
                    frame_index,
                })
                .collect(),
        ))
    }

    fn read_frame_bytes(&mut self, frame_index: u64) -> Result<Vec<u8>> {
        check_window(&self.path, frame_index, 1, self.sample_count as u64)?;
        // mp4 sample ids are 1 based
        let sample = self
            .mp4_reader
            .read_sample(self.track_id, frame_index as u32 + 1)
            .map_err(|e| mp4_error(&self.path, e))?
            .ok_or_else(|| SyncError::decode(&self.path, format!("no sample for frame {}", frame_index)))?;
        Ok(sample.bytes.to_vec())
    }
}
