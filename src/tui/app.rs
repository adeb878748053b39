//! Navigator state: the session being opened or navigated, and the message log.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use longrec_toolbox::annotation::{self, Interval, Stamp, StampEncoding};
use longrec_toolbox::config::SessionConfig;
use longrec_toolbox::navigation::{
    Cursor, NavState, NavigationController, NavigationEvent, Step,
};
use longrec_toolbox::session::{PendingSession, Session};

use super::events::Action;

/// Messages kept in the log pane.
const MAX_MESSAGES: usize = 200;

/// Window width change of `[` and `]`.
const WINDOW_STEP: f64 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// Catalogs are being built on a background thread.
    Opening,
    Navigating,
    /// The session could not be opened.
    Failed,
}

pub struct App {
    pub mode: AppMode,
    pub session_path: PathBuf,
    pub session: Option<Session>,
    pending: Option<PendingSession>,
    events: Option<Receiver<NavigationEvent>>,
    pub messages: VecDeque<String>,
    pub error: Option<String>,
    /// Open end of an annotation interval.
    pub mark: Option<Cursor>,
    annotation_file: Option<PathBuf>,
    encoding: StampEncoding,
    pub opened_at: Instant,
    last_tick: Instant,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        config: SessionConfig,
        session_path: PathBuf,
        annotation_file: Option<PathBuf>,
        encoding: StampEncoding,
    ) -> Self {
        let now = Instant::now();
        Self {
            mode: AppMode::Opening,
            session_path,
            session: None,
            pending: Some(Session::open_in_background(config)),
            events: None,
            messages: VecDeque::new(),
            error: None,
            mark: None,
            annotation_file,
            encoding,
            opened_at: now,
            last_tick: now,
            should_quit: false,
        }
    }

    pub fn controller(&self) -> Option<&NavigationController> {
        self.session.as_ref().map(|s| &s.controller)
    }

    fn controller_mut(&mut self) -> Option<&mut NavigationController> {
        self.session.as_mut().map(|s| &mut s.controller)
    }

    pub fn push_message(&mut self, message: impl Into<String>) {
        self.messages.push_back(message.into());
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }

    /// Advance playback, collect finished loads and drain controller events.
    pub fn on_tick(&mut self) {
        let elapsed = self.last_tick.elapsed();
        self.last_tick = Instant::now();

        if self.mode == AppMode::Opening {
            self.finish_opening();
            return;
        }

        let Some(controller) = self.controller_mut() else {
            return;
        };
        controller.tick(elapsed);
        controller.poll();

        let drained: Vec<NavigationEvent> = match &self.events {
            Some(events) => events.try_iter().collect(),
            None => Vec::new(),
        };
        for event in drained {
            match event {
                NavigationEvent::Warning(message) => self.push_message(format!("warning: {}", message)),
                NavigationEvent::ChunkLoadFailed {
                    chunk_index,
                    message,
                } => self.push_message(format!("chunk {} failed: {}", chunk_index, message)),
                NavigationEvent::ChunkChanged { current, .. } => {
                    self.push_message(format!("chunk {} loaded", current))
                }
                _ => {}
            }
        }
    }

    fn finish_opening(&mut self) {
        if !self.pending.as_ref().is_some_and(|p| p.is_finished()) {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        match pending.join() {
            Ok(mut session) => {
                self.events = Some(session.controller.subscribe());
                let issues: Vec<String> = session.issues.iter().map(|i| i.to_string()).collect();
                let chunks = session.plan.chunk_count();
                self.session = Some(session);
                self.mode = AppMode::Navigating;
                for issue in issues {
                    self.push_message(format!("catalog: {}", issue));
                }
                self.push_message(format!("session opened, {} chunk(s)", chunks));
            }
            Err(e) => {
                self.error = Some(e.to_string());
                self.mode = AppMode::Failed;
            }
        }
    }

    pub fn apply(&mut self, action: Action) {
        if action == Action::Quit {
            self.should_quit = true;
            return;
        }
        let Some(controller) = self.controller_mut() else {
            return;
        };
        match action {
            Action::StepBackward => controller.step(Step::Samples(-1)),
            Action::StepForward => controller.step(Step::Samples(1)),
            Action::JumpBackward => controller.step(Step::Seconds(-1.0)),
            Action::JumpForward => controller.step(Step::Seconds(1.0)),
            Action::PreviousChunk => {
                controller.previous_chunk();
            }
            Action::NextChunk => {
                controller.next_chunk();
            }
            Action::First => controller.seek_to_position(0, 0),
            Action::Last => {
                let end = controller.plan().span.global_end;
                controller.seek_to_time(end);
            }
            Action::ZoomIn => controller.zoom_in(),
            Action::ZoomOut => controller.zoom_out(),
            Action::ShowAll => controller.show_all(),
            Action::NarrowerWindow => {
                let (_, width) = controller.window_range();
                controller.set_window_duration(width / WINDOW_STEP);
            }
            Action::WiderWindow => {
                let (_, width) = controller.window_range();
                controller.set_window_duration(width * WINDOW_STEP);
            }
            Action::TogglePlay => match controller.state() {
                NavState::Playing => controller.pause(),
                _ => controller.play(),
            },
            Action::Mark => self.toggle_mark(),
            Action::Stamp => {
                let (time, index) = annotation::stamps(&controller.cursor());
                self.push_message(format!("stamp: {} {}", time, index));
            }
            Action::Quit => {}
        }
    }

    fn toggle_mark(&mut self) {
        let Some(here) = self.controller().map(|c| c.cursor()) else {
            return;
        };
        match self.mark.take() {
            None => {
                self.mark = Some(here);
                self.push_message(format!("mark: {}", Stamp::from_cursor(&here, self.encoding)));
            }
            Some(start) => {
                let interval = match Interval::from_cursors(&start, &here, self.encoding) {
                    Ok(interval) => interval,
                    Err(e) => {
                        self.push_message(format!("mark failed: {}", e));
                        return;
                    }
                };
                if let Some(path) = self.annotation_file.clone() {
                    if let Err(e) = annotation::append_interval(&path, &interval) {
                        self.push_message(format!("could not save {}: {}", path.display(), e));
                        return;
                    }
                }
                self.push_message(format!("interval: {}", interval));
            }
        }
    }
}
