//! Terminal events and the navigator key map.

use std::time::Duration;

use anyhow::Result;
use crossterm::event::{
    self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
};

/// Application events.
#[derive(Debug)]
pub enum Event {
    /// A key was pressed
    Key(KeyEvent),
    /// Timer tick, drives playback and chunk load polling
    Tick,
    /// Terminal was resized
    Resize,
}

/// Event handler that polls for terminal events.
pub struct EventHandler {
    tick_rate: Duration,
}

impl EventHandler {
    pub fn new(tick_rate: Duration) -> Self {
        Self { tick_rate }
    }

    /// Poll for the next event, returning `Tick` when nothing arrives within the tick rate.
    pub fn next(&self) -> Result<Event> {
        if event::poll(self.tick_rate)? {
            match event::read()? {
                // Only handle key press events, ignore repeats and releases
                CrosstermEvent::Key(key) if key.kind == KeyEventKind::Press => {
                    Ok(Event::Key(key))
                }
                CrosstermEvent::Resize(_, _) => Ok(Event::Resize),
                _ => Ok(Event::Tick),
            }
        } else {
            Ok(Event::Tick)
        }
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(40)) // 25 fps playback refresh
    }
}

/// What a key asks the navigator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    /// One reference sample.
    StepBackward,
    StepForward,
    /// One second.
    JumpBackward,
    JumpForward,
    PreviousChunk,
    NextChunk,
    First,
    Last,
    ZoomIn,
    ZoomOut,
    ShowAll,
    NarrowerWindow,
    WiderWindow,
    TogglePlay,
    Mark,
    Stamp,
}

/// Check if a key event is Ctrl+C.
pub fn is_ctrl_c(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

/// Check if a key event is Escape.
pub fn is_esc(key: &KeyEvent) -> bool {
    key.code == KeyCode::Esc
}

/// Map a key to a navigator action.
pub fn action_for(key: &KeyEvent) -> Option<Action> {
    if is_ctrl_c(key) || is_esc(key) {
        return Some(Action::Quit);
    }
    let action = match key.code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Left => Action::StepBackward,
        KeyCode::Right => Action::StepForward,
        KeyCode::Down => Action::JumpBackward,
        KeyCode::Up => Action::JumpForward,
        KeyCode::PageUp => Action::PreviousChunk,
        KeyCode::PageDown => Action::NextChunk,
        KeyCode::Home => Action::First,
        KeyCode::End => Action::Last,
        KeyCode::Char('+') | KeyCode::Char('=') => Action::ZoomIn,
        KeyCode::Char('-') => Action::ZoomOut,
        KeyCode::Char('a') => Action::ShowAll,
        KeyCode::Char('[') => Action::NarrowerWindow,
        KeyCode::Char(']') => Action::WiderWindow,
        KeyCode::Char(' ') => Action::TogglePlay,
        KeyCode::Char('m') => Action::Mark,
        KeyCode::Char('s') => Action::Stamp,
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_actions() {
        let key = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(action_for(&key(KeyCode::Right)), Some(Action::StepForward));
        assert_eq!(action_for(&key(KeyCode::PageDown)), Some(Action::NextChunk));
        assert_eq!(action_for(&key(KeyCode::Char(' '))), Some(Action::TogglePlay));
        assert_eq!(action_for(&key(KeyCode::Esc)), Some(Action::Quit));
        assert_eq!(
            action_for(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Quit)
        );
        assert_eq!(action_for(&key(KeyCode::Char('x'))), None);
    }
}
