//! Chunk loading worker.
//!
//! One background thread serves a single request slot. Posting a request
//! replaces whatever was waiting in the slot, and a load in progress checks
//! between segments whether it is still the latest one; if not it stops and
//! drops the readers it opened. Results carry their generation so the
//! controller can discard anything that is not the latest.

use ndarray::Array2;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::catalog::ModalityId;
use crate::error::SyncError;
use crate::planner::{ChunkPlan, SegmentKind};
use crate::reader::{self, FrameRef, ModalityReader, ReaderKind, WindowData};

/// How to open the files of one modality.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalitySource {
    pub kind: ReaderKind,
    pub key: Option<String>,
    pub channels: usize,
}

/// Assembled data of one modality for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkBuffer {
    /// `[samples, channels]`, gaps are NaN.
    Signal { frequency: f64, values: Array2<f64> },
    /// One entry per frame; gaps repeat the last frame, a leading gap is `None`.
    Frames {
        frequency: f64,
        frames: Vec<Option<FrameRef>>,
    },
    /// Irregular samples, times in seconds since the chunk start.
    Timed { times: Vec<f64>, values: Array2<f64> },
}

impl ChunkBuffer {
    pub fn len(&self) -> usize {
        match self {
            ChunkBuffer::Signal { values, .. } => values.nrows(),
            ChunkBuffer::Frames { frames, .. } => frames.len(),
            ChunkBuffer::Timed { times, .. } => times.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frequency(&self) -> Option<f64> {
        match self {
            ChunkBuffer::Signal { frequency, .. } | ChunkBuffer::Frames { frequency, .. } => Some(*frequency),
            ChunkBuffer::Timed { .. } => None,
        }
    }
}

pub struct LoadRequest {
    pub generation: u64,
    pub chunk_index: usize,
    pub entries: Vec<ChunkPlan>,
    pub sources: Arc<BTreeMap<ModalityId, ModalitySource>>,
}

/// A fully loaded chunk. Owns the readers it opened until dropped.
pub struct LoadedChunk {
    pub generation: u64,
    pub chunk_index: usize,
    pub buffers: BTreeMap<ModalityId, ChunkBuffer>,
    /// Modalities degraded to gaps by a read error.
    pub warnings: Vec<String>,
    readers: HashMap<(ModalityId, PathBuf), Box<dyn ModalityReader>>,
}

impl LoadedChunk {
    pub fn open_handles(&self) -> usize {
        self.readers.len()
    }

    /// Reader kept open for `path`, if this chunk used it.
    pub fn reader_mut(&mut self, modality: &ModalityId, path: &PathBuf) -> Option<&mut Box<dyn ModalityReader>> {
        self.readers.get_mut(&(modality.clone(), path.clone()))
    }
}

pub enum LoadOutcome {
    Loaded(LoadedChunk),
    Failed {
        generation: u64,
        chunk_index: usize,
        error: SyncError,
    },
}

impl LoadOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            LoadOutcome::Loaded(chunk) => chunk.generation,
            LoadOutcome::Failed { generation, .. } => *generation,
        }
    }
}

#[derive(Default)]
struct Slot {
    request: Option<LoadRequest>,
    shutdown: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    wakeup: Condvar,
    latest: AtomicU64,
    shutdown: AtomicBool,
}

/// Handle on the loading thread. Dropping it stops the thread.
pub struct ChunkLoader {
    shared: Arc<Shared>,
    results: Receiver<LoadOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl ChunkLoader {
    pub fn spawn() -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            wakeup: Condvar::new(),
            latest: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::channel();

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("chunk-loader".to_string())
            .spawn(move || worker_loop(worker_shared, tx))
            .ok();
        if worker.is_none() {
            tracing::warn!("could not start the chunk loader thread, chunks will not load");
        }

        Self {
            shared,
            results: rx,
            worker,
        }
    }

    /// Post a request, superseding any request still waiting or running.
    pub fn request(&self, request: LoadRequest) {
        self.shared.latest.store(request.generation, Ordering::SeqCst);
        match self.shared.slot.lock() {
            Ok(mut slot) => slot.request = Some(request),
            Err(poisoned) => poisoned.into_inner().request = Some(request),
        }
        self.shared.wakeup.notify_one();
    }

    /// Abandon everything older than `generation` without starting a new load.
    pub fn cancel(&self, generation: u64) {
        self.shared.latest.store(generation, Ordering::SeqCst);
        match self.shared.slot.lock() {
            Ok(mut slot) => slot.request = None,
            Err(poisoned) => poisoned.into_inner().request = None,
        }
    }

    pub fn try_recv(&self) -> Option<LoadOutcome> {
        self.results.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<LoadOutcome> {
        match self.results.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Drop for ChunkLoader {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        match self.shared.slot.lock() {
            Ok(mut slot) => slot.shutdown = true,
            Err(poisoned) => poisoned.into_inner().shutdown = true,
        }
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, results: Sender<LoadOutcome>) {
    loop {
        let request = {
            let Ok(mut slot) = shared.slot.lock() else {
                return;
            };
            loop {
                if slot.shutdown {
                    return;
                }
                if let Some(request) = slot.request.take() {
                    break request;
                }
                slot = match shared.wakeup.wait(slot) {
                    Ok(slot) => slot,
                    Err(_) => return,
                };
            }
        };

        let generation = request.generation;
        let is_stale = || {
            shared.shutdown.load(Ordering::SeqCst) || shared.latest.load(Ordering::SeqCst) != generation
        };

        match load_chunk(&request, &is_stale) {
            Some(outcome) => {
                if results.send(outcome).is_err() {
                    return;
                }
            }
            None => tracing::debug!("chunk {} load (generation {}) superseded", request.chunk_index, generation),
        }
    }
}

/// Assemble every modality of one chunk. `None` when superseded midway.
pub fn load_chunk(request: &LoadRequest, is_stale: &dyn Fn() -> bool) -> Option<LoadOutcome> {
    let mut readers: HashMap<(ModalityId, PathBuf), Box<dyn ModalityReader>> = HashMap::new();
    let mut buffers = BTreeMap::new();
    let mut warnings = Vec::new();

    tracing::debug!("loading chunk {} (generation {})", request.chunk_index, request.generation);

    for entry in &request.entries {
        let Some(source) = request.sources.get(&entry.modality) else {
            warnings.push(format!("[{}] no reader configuration, shown as gap", entry.modality));
            buffers.insert(entry.modality.clone(), gap_buffer(entry, None));
            continue;
        };

        match assemble(entry, source, &mut readers, &mut warnings, is_stale) {
            Ok(Some(buffer)) => {
                buffers.insert(entry.modality.clone(), buffer);
            }
            Ok(None) => return None,
            Err(e) if e.is_recoverable_read_error() => {
                let message = format!(
                    "[{}] chunk {} shown as gap: {}",
                    entry.modality, request.chunk_index, e
                );
                tracing::warn!("{}", message);
                warnings.push(message);
                buffers.insert(entry.modality.clone(), gap_buffer(entry, Some(source)));
            }
            Err(e) => {
                return Some(LoadOutcome::Failed {
                    generation: request.generation,
                    chunk_index: request.chunk_index,
                    error: e,
                });
            }
        }
    }

    Some(LoadOutcome::Loaded(LoadedChunk {
        generation: request.generation,
        chunk_index: request.chunk_index,
        buffers,
        warnings,
        readers,
    }))
}

fn reader_for<'a>(
    readers: &'a mut HashMap<(ModalityId, PathBuf), Box<dyn ModalityReader>>,
    modality: &ModalityId,
    path: &PathBuf,
    source: &ModalitySource,
) -> crate::error::Result<&'a mut Box<dyn ModalityReader>> {
    let key = (modality.clone(), path.clone());
    if !readers.contains_key(&key) {
        let reader = reader::open_reader(path, source.kind, source.key.as_deref())?;
        readers.insert(key.clone(), reader);
    }
    readers
        .get_mut(&key)
        .ok_or_else(|| SyncError::decode(path, "reader vanished from cache"))
}

fn gap_buffer(entry: &ChunkPlan, source: Option<&ModalitySource>) -> ChunkBuffer {
    let channels = source.map(|s| s.channels.max(1)).unwrap_or(1);
    match (entry.frequency, source.map(|s| s.kind)) {
        (Some(frequency), Some(ReaderKind::VideoContainer)) => ChunkBuffer::Frames {
            frequency,
            frames: vec![None; entry.sample_count as usize],
        },
        (Some(frequency), _) => ChunkBuffer::Signal {
            frequency,
            values: Array2::from_elem((entry.sample_count as usize, channels), f64::NAN),
        },
        (None, _) => ChunkBuffer::Timed {
            times: Vec::new(),
            values: Array2::zeros((0, channels)),
        },
    }
}

/// Read the segments of one modality into a chunk buffer.
///
/// Source segments are clamped to what their file still holds; the missing
/// tail is filled like a gap and reported in `warnings`.
fn assemble(
    entry: &ChunkPlan,
    source: &ModalitySource,
    readers: &mut HashMap<(ModalityId, PathBuf), Box<dyn ModalityReader>>,
    warnings: &mut Vec<String>,
    is_stale: &dyn Fn() -> bool,
) -> crate::error::Result<Option<ChunkBuffer>> {
    let channels = source.channels.max(1);

    let Some(frequency) = entry.frequency else {
        let mut times = Vec::new();
        let mut flat = Vec::new();
        for segment in &entry.segments {
            if is_stale() {
                return Ok(None);
            }
            let SegmentKind::TimeRange {
                path,
                local_start,
                local_end,
                closed_end,
            } = &segment.kind
            else {
                continue;
            };
            let reader = reader_for(readers, &entry.modality, path, source)?;
            let end = if *closed_end { f64::INFINITY } else { *local_end };
            let samples = reader.read_window_by_time(*local_start, end)?;
            if samples.values.ncols() != channels && !samples.is_empty() {
                return Err(SyncError::decode(
                    path,
                    format!("{} channels, expected {}", samples.values.ncols(), channels),
                ));
            }
            times.extend(
                samples
                    .times
                    .iter()
                    .map(|t| segment.chunk_offset + (t - local_start)),
            );
            flat.extend(samples.values.iter().copied());
        }
        let rows = times.len();
        let values = Array2::from_shape_vec((rows, channels), flat)
            .map_err(|e| SyncError::InvalidConfig(format!("bad timed buffer shape: {}", e)))?;
        return Ok(Some(ChunkBuffer::Timed { times, values }));
    };

    let total = entry.sample_count as usize;
    let video = source.kind == ReaderKind::VideoContainer;
    let mut frames: Vec<Option<FrameRef>> = if video { Vec::with_capacity(total) } else { Vec::new() };
    let mut values = if video {
        Array2::zeros((0, channels))
    } else {
        Array2::from_elem((total, channels), f64::NAN)
    };
    let mut position = 0usize;

    for segment in &entry.segments {
        if is_stale() {
            return Ok(None);
        }
        match &segment.kind {
            SegmentKind::Gap { length } => {
                let length = *length as usize;
                if video {
                    let hold = frames.last().cloned().flatten();
                    frames.extend(std::iter::repeat_n(hold, length));
                }
                position += length;
            }
            SegmentKind::Source {
                path,
                local_offset,
                length,
            } => {
                let reader = reader_for(readers, &entry.modality, path, source)?;
                // the file may have shrunk since it was cataloged
                let available = reader.probe()?.sample_count;
                let readable = available.saturating_sub(*local_offset).min(*length);
                if readable < *length {
                    let message = format!(
                        "[{}] chunk {} partly shown as gap: {} ends after {} samples, {} planned samples missing",
                        entry.modality,
                        entry.chunk_index,
                        path.display(),
                        available,
                        length - readable
                    );
                    tracing::warn!("{}", message);
                    warnings.push(message);
                }
                let window = if readable > 0 {
                    Some(reader.read_window(*local_offset, readable)?)
                } else {
                    None
                };
                match window {
                    None => {}
                    Some(WindowData::Frames(window)) => frames.extend(window.into_iter().map(Some)),
                    Some(WindowData::Signal(window)) => {
                        if window.ncols() != channels {
                            return Err(SyncError::decode(
                                path,
                                format!("{} channels, expected {}", window.ncols(), channels),
                            ));
                        }
                        let end = (position + window.nrows()).min(total);
                        values
                            .slice_mut(ndarray::s![position..end, ..])
                            .assign(&window.slice(ndarray::s![..end - position, ..]));
                    }
                }
                if video && readable < *length {
                    let hold = frames.last().cloned().flatten();
                    frames.extend(std::iter::repeat_n(hold, (*length - readable) as usize));
                }
                position += *length as usize;
            }
            // a broken plan, not a read failure: the whole load fails
            SegmentKind::TimeRange { path, .. } => {
                return Err(SyncError::InvalidConfig(format!(
                    "chunk {} of {} plans a time range of {} at {} Hz",
                    entry.chunk_index,
                    entry.modality,
                    path.display(),
                    frequency
                )));
            }
        }
    }

    if video {
        frames.resize(total, None);
        Ok(Some(ChunkBuffer::Frames { frequency, frames }))
    } else {
        Ok(Some(ChunkBuffer::Signal { frequency, values }))
    }
}
