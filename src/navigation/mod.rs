//! Temporal navigation over a planned recording.
//!
//! The controller owns the cursor, the active chunk and the display window.
//! Moving inside the loaded chunk only updates the cursor; moving to another
//! chunk posts a load to the [`loader::ChunkLoader`] and keeps showing nothing
//! (`get_display_window` returns `None`) until the new chunk is complete.
//! Collaborators call [`NavigationController::poll`] from their own loop and
//! listen to [`NavigationEvent`]s from [`NavigationController::subscribe`].

pub mod loader;

use chrono::{DateTime, FixedOffset};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use crate::catalog::ModalityId;
use crate::error::{Result, SyncError};
use crate::planner::SyncPlan;
use crate::reader::FrameRef;
use crate::timestamp;
use loader::{ChunkBuffer, ChunkLoader, LoadOutcome, LoadRequest, LoadedChunk, ModalitySource};

/// Zooming in stops once the window is this narrow (reference samples).
const MIN_ZOOM_WIDTH: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Stopped,
    Playing,
    /// A chunk load is in flight; the previous state resumes when it completes.
    Seeking,
}

/// Playback position. `absolute_time` is derived from the chunk and sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cursor {
    pub absolute_time: DateTime<FixedOffset>,
    pub chunk_index: usize,
    /// Sample index in the chunk at the reference frequency.
    pub sample_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Samples(i64),
    Seconds(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationEvent {
    CursorChanged(Cursor),
    ChunkChanged { previous: Option<usize>, current: usize },
    ChunkReady(usize),
    ChunkLoadFailed { chunk_index: usize, message: String },
    StateChanged(NavState),
    Warning(String),
}

/// Time axis used for cursor sample indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAxis {
    pub modality: Option<ModalityId>,
    pub frequency: f64,
}

/// Data of one modality inside the display window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowSlice {
    /// `[samples, channels]`, NaN in gaps. `first_sample` is the chunk index of row 0.
    Signal {
        frequency: f64,
        first_sample: u64,
        values: Array2<f64>,
    },
    Frames {
        frequency: f64,
        first_frame: u64,
        frames: Vec<Option<FrameRef>>,
    },
    /// Times in seconds since the window start.
    Timed { times: Vec<f64>, values: Array2<f64> },
}

impl WindowSlice {
    pub fn len(&self) -> usize {
        match self {
            WindowSlice::Signal { values, .. } => values.nrows(),
            WindowSlice::Frames { frames, .. } => frames.len(),
            WindowSlice::Timed { times, .. } => times.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the display shows right now.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayWindow {
    pub chunk_index: usize,
    pub start_time: DateTime<FixedOffset>,
    /// Seconds.
    pub duration: f64,
    pub cursor: Cursor,
    pub modalities: BTreeMap<ModalityId, WindowSlice>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    generation: u64,
    chunk_index: usize,
    sample_index: u64,
}

/// Visible range in reference samples of the active chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: u64,
    width: u64,
}

pub struct NavigationController {
    plan: Arc<SyncPlan>,
    sources: Arc<BTreeMap<ModalityId, ModalitySource>>,
    reference: ReferenceAxis,
    state: NavState,
    resume_state: NavState,
    cursor: Cursor,
    pending: Option<Pending>,
    loaded: Option<LoadedChunk>,
    window: Window,
    zoom_factor: f64,
    loader: ChunkLoader,
    generation: u64,
    subscribers: Vec<Sender<NavigationEvent>>,
    playback_carry: f64,
}

impl NavigationController {
    /// Create a controller positioned at the global start and start loading chunk 0.
    pub fn new(
        plan: Arc<SyncPlan>,
        sources: BTreeMap<ModalityId, ModalitySource>,
        reference: ReferenceAxis,
        window_duration: f64,
        zoom_factor: f64,
    ) -> Result<Self> {
        if plan.chunks.is_empty() {
            return Err(SyncError::EmptySpan("plan has no chunk".to_string()));
        }
        if !(reference.frequency > 0.0) {
            return Err(SyncError::InvalidConfig(format!(
                "reference frequency must be positive, got {}",
                reference.frequency
            )));
        }

        let cursor = Cursor {
            absolute_time: plan.span.global_start,
            chunk_index: 0,
            sample_index: 0,
        };
        let mut controller = Self {
            plan,
            sources: Arc::new(sources),
            reference,
            state: NavState::Stopped,
            resume_state: NavState::Stopped,
            cursor,
            pending: None,
            loaded: None,
            window: Window { start: 0, width: 1 },
            zoom_factor,
            loader: ChunkLoader::spawn(),
            generation: 0,
            subscribers: Vec::new(),
            playback_carry: 0.0,
        };
        controller.window.width = controller.samples_for(window_duration);
        controller.begin_load(0, 0);
        Ok(controller)
    }

    pub fn plan(&self) -> &SyncPlan {
        &self.plan
    }

    pub fn reference(&self) -> &ReferenceAxis {
        &self.reference
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// Last committed cursor.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Where the cursor will be once the pending load completes.
    pub fn target(&self) -> Cursor {
        match self.pending {
            Some(p) => self.make_cursor(p.chunk_index, p.sample_index),
            None => self.cursor,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Chunk whose data is resident, if any.
    pub fn loaded_chunk(&self) -> Option<usize> {
        self.loaded.as_ref().map(|c| c.chunk_index)
    }

    pub fn open_handles(&self) -> usize {
        self.loaded.as_ref().map_or(0, LoadedChunk::open_handles)
    }

    pub fn subscribe(&mut self) -> Receiver<NavigationEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: NavigationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ---------------------------------------------------------------------
    // Sample grid
    // ---------------------------------------------------------------------

    fn samples_for(&self, seconds: f64) -> u64 {
        ((seconds * self.reference.frequency).round() as u64).max(1)
    }

    /// First global reference sample of a chunk and its sample count.
    fn chunk_bounds(&self, chunk_index: usize) -> (u64, u64) {
        let f = self.reference.frequency;
        let chunk = &self.plan.chunks[chunk_index];
        let first = (chunk.offset * f).round() as u64;
        let end = if chunk_index + 1 == self.plan.chunks.len() {
            (self.plan.span.duration_secs() * f).round() as u64
        } else {
            ((chunk.offset + chunk.duration) * f).round() as u64
        };
        (first, end.saturating_sub(first).max(1))
    }

    /// Number of reference samples in a chunk.
    pub fn chunk_sample_count(&self, chunk_index: usize) -> u64 {
        self.chunk_bounds(chunk_index).1
    }

    fn last_position(&self) -> (usize, u64) {
        let last = self.plan.chunks.len() - 1;
        (last, self.chunk_sample_count(last) - 1)
    }

    /// Chunk and sample of a global reference sample, clamped to the span.
    fn locate(&self, global_sample: i64) -> (usize, u64) {
        if global_sample <= 0 {
            return (0, 0);
        }
        let g = global_sample as u64;
        for index in 0..self.plan.chunks.len() {
            let (first, count) = self.chunk_bounds(index);
            if g < first + count {
                return (index, g.saturating_sub(first));
            }
        }
        self.last_position()
    }

    fn global_sample(&self, chunk_index: usize, sample_index: u64) -> i64 {
        (self.chunk_bounds(chunk_index).0 + sample_index) as i64
    }

    fn make_cursor(&self, chunk_index: usize, sample_index: u64) -> Cursor {
        let g = self.global_sample(chunk_index, sample_index);
        Cursor {
            absolute_time: timestamp::offset_by_seconds(
                self.plan.span.global_start,
                g as f64 / self.reference.frequency,
            ),
            chunk_index,
            sample_index,
        }
    }

    /// `(chunk, sample)` for an absolute time, clamped to the recording.
    pub fn position_of(&self, t: DateTime<FixedOffset>) -> (usize, u64) {
        let offset = timestamp::seconds_between(self.plan.span.global_start, t);
        if offset >= self.plan.span.duration_secs() {
            return self.last_position();
        }
        // 1e-6 absorbs the microsecond rounding of absolute times
        self.locate((offset * self.reference.frequency + 1e-6).floor() as i64)
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    /// Jump to an absolute time. Before the start clamps to the start, at or
    /// after the end clamps to the last sample.
    pub fn seek_to_time(&mut self, t: DateTime<FixedOffset>) {
        let (chunk, sample) = self.position_of(t);
        self.move_to(chunk, sample);
    }

    /// Jump to a `(chunk, sample)` position, clamped to the recording.
    pub fn seek_to_position(&mut self, chunk_index: usize, sample_index: u64) {
        let (chunk, sample) = if chunk_index >= self.plan.chunks.len() {
            self.last_position()
        } else {
            let count = self.chunk_sample_count(chunk_index);
            (chunk_index, sample_index.min(count - 1))
        };
        self.move_to(chunk, sample);
    }

    /// Absolute time of a `(chunk, sample)` position, `None` outside the plan.
    pub fn time_of(&self, chunk_index: usize, sample_index: u64) -> Option<DateTime<FixedOffset>> {
        if chunk_index >= self.plan.chunks.len() || sample_index >= self.chunk_sample_count(chunk_index) {
            return None;
        }
        Some(self.make_cursor(chunk_index, sample_index).absolute_time)
    }

    /// Move by a number of reference samples or seconds, across chunks if needed.
    pub fn step(&mut self, step: Step) {
        let delta = match step {
            Step::Samples(n) => n,
            Step::Seconds(s) => (s * self.reference.frequency).round() as i64,
        };
        let from = self.target();
        let g = self.global_sample(from.chunk_index, from.sample_index) + delta;
        let (chunk, sample) = self.locate(g);
        self.move_to(chunk, sample);
    }

    /// Switch to the start of a chunk. `false` when the index does not exist.
    pub fn set_chunk(&mut self, index: usize) -> bool {
        if index >= self.plan.chunks.len() {
            self.emit(NavigationEvent::Warning(format!(
                "chunk {} does not exist ({} chunks)",
                index,
                self.plan.chunks.len()
            )));
            return false;
        }
        self.move_to(index, 0);
        true
    }

    pub fn next_chunk(&mut self) -> bool {
        self.set_chunk(self.target().chunk_index + 1)
    }

    pub fn previous_chunk(&mut self) -> bool {
        match self.target().chunk_index.checked_sub(1) {
            Some(index) => self.set_chunk(index),
            None => false,
        }
    }

    /// Width of the display window in seconds.
    pub fn set_window_duration(&mut self, seconds: f64) {
        if !(seconds > 0.0) {
            return;
        }
        let count = self.chunk_sample_count(self.cursor.chunk_index);
        self.window.width = self.samples_for(seconds).min(count);
        self.follow_cursor();
    }

    /// Zoom around the cursor. `factor > 1` zooms in, `factor < 1` zooms out.
    /// The cursor keeps its relative position in the window.
    pub fn set_zoom(&mut self, factor: f64) {
        if !(factor > 0.0) || factor == 1.0 {
            return;
        }
        if factor > 1.0 && self.window.width <= MIN_ZOOM_WIDTH {
            return;
        }
        let count = self.chunk_sample_count(self.cursor.chunk_index) as f64;
        let cursor = self.cursor.sample_index as f64;
        let start = self.window.start as f64;
        let end = start + self.window.width as f64;
        let left = (cursor - start).max(0.0);
        let right = (end - cursor).max(0.0);

        let new_start = (cursor - left / factor).max(0.0).floor();
        let new_end = (cursor + right / factor).min(count).ceil();
        self.window.start = new_start as u64;
        self.window.width = ((new_end - new_start) as u64).max(1);
        self.clamp_window();
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom_factor);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(1.0 / self.zoom_factor);
    }

    /// Show the whole active chunk.
    pub fn show_all(&mut self) {
        self.window = Window {
            start: 0,
            width: self.chunk_sample_count(self.cursor.chunk_index),
        };
    }

    /// Window start and duration in seconds from the chunk start.
    pub fn window_range(&self) -> (f64, f64) {
        let f = self.reference.frequency;
        (self.window.start as f64 / f, self.window.width as f64 / f)
    }

    pub fn play(&mut self) {
        match self.state {
            NavState::Stopped => self.set_state(NavState::Playing),
            NavState::Seeking => self.resume_state = NavState::Playing,
            NavState::Playing => {}
        }
    }

    pub fn pause(&mut self) {
        self.playback_carry = 0.0;
        match self.state {
            NavState::Playing => self.set_state(NavState::Stopped),
            NavState::Seeking => self.resume_state = NavState::Stopped,
            NavState::Stopped => {}
        }
    }

    /// Advance playback by wall-clock time. Stops at the end of the recording.
    pub fn tick(&mut self, elapsed: Duration) {
        if self.state != NavState::Playing {
            return;
        }
        self.playback_carry += elapsed.as_secs_f64() * self.reference.frequency;
        let whole = self.playback_carry.floor();
        if whole < 1.0 {
            return;
        }
        self.playback_carry -= whole;

        let (last_chunk, last_sample) = self.last_position();
        let g = self.global_sample(self.cursor.chunk_index, self.cursor.sample_index) + whole as i64;
        let (chunk, sample) = self.locate(g);
        self.move_to(chunk, sample);
        if (chunk, sample) == (last_chunk, last_sample) {
            self.playback_carry = 0.0;
            match self.state {
                NavState::Seeking => self.resume_state = NavState::Stopped,
                _ => self.set_state(NavState::Stopped),
            }
        }
    }

    fn set_state(&mut self, state: NavState) {
        if self.state != state {
            self.state = state;
            self.emit(NavigationEvent::StateChanged(state));
        }
    }

    fn move_to(&mut self, chunk_index: usize, sample_index: u64) {
        let resident = self.loaded_chunk() == Some(chunk_index);
        match self.pending {
            Some(p) if p.chunk_index == chunk_index => {
                self.pending = Some(Pending { sample_index, ..p });
            }
            Some(_) if resident => {
                // back to the resident chunk: drop the in-flight load
                self.generation += 1;
                self.loader.cancel(self.generation);
                self.pending = None;
                let resume = self.resume_state;
                self.set_state(resume);
                self.commit_cursor(chunk_index, sample_index);
            }
            None if resident => self.commit_cursor(chunk_index, sample_index),
            _ => self.begin_load(chunk_index, sample_index),
        }
    }

    fn commit_cursor(&mut self, chunk_index: usize, sample_index: u64) {
        let cursor = self.make_cursor(chunk_index, sample_index);
        if cursor != self.cursor {
            self.cursor = cursor;
            self.follow_cursor();
            self.emit(NavigationEvent::CursorChanged(cursor));
        }
    }

    fn begin_load(&mut self, chunk_index: usize, sample_index: u64) {
        self.generation += 1;
        if self.state != NavState::Seeking {
            self.resume_state = self.state;
            self.set_state(NavState::Seeking);
        }
        self.pending = Some(Pending {
            generation: self.generation,
            chunk_index,
            sample_index,
        });
        self.loader.request(LoadRequest {
            generation: self.generation,
            chunk_index,
            entries: self.plan.chunk_entries(chunk_index).cloned().collect(),
            sources: self.sources.clone(),
        });
    }

    /// Apply finished loads. Returns `true` when something changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Some(outcome) = self.loader.try_recv() {
            changed |= self.apply(outcome);
        }
        changed
    }

    /// Block until the pending load (if any) is applied. `false` on timeout.
    pub fn wait_until_ready(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Some(outcome) = self.loader.recv_timeout(deadline - now) {
                self.apply(outcome);
            }
        }
        true
    }

    fn apply(&mut self, outcome: LoadOutcome) -> bool {
        let Some(pending) = self.pending else {
            return false;
        };
        if outcome.generation() != pending.generation {
            // superseded; dropping it releases its readers
            return false;
        }
        self.pending = None;
        let resume = self.resume_state;

        match outcome {
            LoadOutcome::Loaded(chunk) => {
                let previous = self.loaded_chunk();
                let warnings = chunk.warnings.clone();
                self.loaded = Some(chunk);
                self.set_state(resume);

                let count = self.chunk_sample_count(pending.chunk_index);
                self.window.width = self.window.width.min(count).max(1);
                if previous != Some(pending.chunk_index) {
                    self.window.start = 0;
                }
                let cursor = self.make_cursor(pending.chunk_index, pending.sample_index.min(count - 1));
                self.cursor = cursor;
                self.follow_cursor();

                for warning in warnings {
                    self.emit(NavigationEvent::Warning(warning));
                }
                self.emit(NavigationEvent::ChunkReady(pending.chunk_index));
                if previous != Some(pending.chunk_index) {
                    self.emit(NavigationEvent::ChunkChanged {
                        previous,
                        current: pending.chunk_index,
                    });
                }
                self.emit(NavigationEvent::CursorChanged(cursor));
            }
            LoadOutcome::Failed { chunk_index, error, .. } => {
                tracing::warn!("loading chunk {} failed: {}", chunk_index, error);
                self.set_state(resume);
                self.emit(NavigationEvent::ChunkLoadFailed {
                    chunk_index,
                    message: error.to_string(),
                });
            }
        }
        true
    }

    /// Page the window so the cursor stays visible: move by one window width
    /// when that is enough, otherwise jump to the cursor.
    fn follow_cursor(&mut self) {
        let count = self.chunk_sample_count(self.cursor.chunk_index);
        self.window.width = self.window.width.min(count).max(1);
        let cursor = self.cursor.sample_index;
        let width = self.window.width;

        if cursor >= self.window.start + width {
            let paged = self.window.start + width;
            self.window.start = if cursor < paged + width { paged } else { cursor };
        } else if cursor < self.window.start {
            let paged = self.window.start.saturating_sub(width);
            self.window.start = if cursor >= paged { paged } else { cursor };
        }
        self.clamp_window();
    }

    fn clamp_window(&mut self) {
        let count = self.chunk_sample_count(self.cursor.chunk_index);
        self.window.width = self.window.width.min(count).max(1);
        if self.window.start + self.window.width > count {
            self.window.start = count - self.window.width;
        }
    }

    // ---------------------------------------------------------------------
    // Collaborator API
    // ---------------------------------------------------------------------

    /// Slice of every resident buffer covering the display window. `None`
    /// while a chunk load is pending.
    pub fn get_display_window(&self) -> Option<DisplayWindow> {
        if self.pending.is_some() {
            return None;
        }
        let loaded = self.loaded.as_ref()?;
        if loaded.chunk_index != self.cursor.chunk_index {
            return None;
        }

        let (window_start, window_duration) = self.window_range();
        let window_end = window_start + window_duration;
        let chunk_start = self.plan.chunks[loaded.chunk_index].start;

        let modalities = loaded
            .buffers
            .iter()
            .map(|(id, buffer)| (id.clone(), slice_buffer(buffer, window_start, window_end)))
            .collect();

        Some(DisplayWindow {
            chunk_index: loaded.chunk_index,
            start_time: timestamp::offset_by_seconds(chunk_start, window_start),
            duration: window_duration,
            cursor: self.cursor,
            modalities,
        })
    }

    pub fn current_time(&self) -> DateTime<FixedOffset> {
        self.cursor.absolute_time
    }

    /// `(chunk, sample)` of the cursor in a modality's own frequency.
    ///
    /// For the reference modality this is the cursor itself. Irregular
    /// modalities have no sample grid and give `None`.
    pub fn current_frame_index(&self, modality: &ModalityId) -> Option<(usize, u64)> {
        if self.reference.modality.as_ref() == Some(modality) {
            return Some((self.cursor.chunk_index, self.cursor.sample_index));
        }
        let entry = self.plan.entry(self.cursor.chunk_index, modality)?;
        let frequency = entry.frequency?;
        let chunk = &self.plan.chunks[self.cursor.chunk_index];
        let seconds = timestamp::seconds_between(self.plan.span.global_start, self.cursor.absolute_time);
        let first = (chunk.offset * frequency).round() as i64;
        let global = (seconds * frequency + 1e-6).floor() as i64;
        let index = (global - first).clamp(0, entry.sample_count.saturating_sub(1) as i64);
        Some((self.cursor.chunk_index, index as u64))
    }

    /// Frame handle shown at the cursor for a video modality.
    pub fn current_frame(&self, modality: &ModalityId) -> Option<FrameRef> {
        let (_, index) = self.current_frame_index(modality)?;
        match self.loaded.as_ref()?.buffers.get(modality)? {
            ChunkBuffer::Frames { frames, .. } => frames.get(index as usize).cloned().flatten(),
            _ => None,
        }
    }

    /// Encoded bytes of the frame at the cursor, read through the chunk's open handle.
    pub fn current_frame_bytes(&mut self, modality: &ModalityId) -> Result<Option<Vec<u8>>> {
        let Some(frame) = self.current_frame(modality) else {
            return Ok(None);
        };
        let Some(loaded) = self.loaded.as_mut() else {
            return Ok(None);
        };
        match loaded.reader_mut(modality, &frame.path) {
            Some(reader) => reader.read_frame_bytes(frame.frame_index).map(Some),
            None => Ok(None),
        }
    }

    /// Buffer of the active chunk for one modality.
    pub fn chunk_buffer(&self, modality: &ModalityId) -> Option<&ChunkBuffer> {
        self.loaded.as_ref()?.buffers.get(modality)
    }
}

/// Cut `[start, end)` seconds (from the chunk start) out of a chunk buffer.
fn slice_buffer(buffer: &ChunkBuffer, start: f64, end: f64) -> WindowSlice {
    let bounds = |frequency: f64, len: usize| {
        let first = ((start * frequency).round().max(0.0) as usize).min(len);
        let last = ((end * frequency).round().max(0.0) as usize).clamp(first, len);
        (first, last)
    };

    match buffer {
        ChunkBuffer::Signal { frequency, values } => {
            let (first, last) = bounds(*frequency, values.nrows());
            WindowSlice::Signal {
                frequency: *frequency,
                first_sample: first as u64,
                values: values.slice(ndarray::s![first..last, ..]).to_owned(),
            }
        }
        ChunkBuffer::Frames { frequency, frames } => {
            let (first, last) = bounds(*frequency, frames.len());
            WindowSlice::Frames {
                frequency: *frequency,
                first_frame: first as u64,
                frames: frames[first..last].to_vec(),
            }
        }
        ChunkBuffer::Timed { times, values } => {
            let first = times.partition_point(|t| *t < start);
            let last = times.partition_point(|t| *t < end).max(first);
            WindowSlice::Timed {
                times: times[first..last].iter().map(|t| t - start).collect(),
                values: values.slice(ndarray::s![first..last, ..]).to_owned(),
            }
        }
    }
}
