//! Terminal navigator for a recording session.
//!
//! Opens the session on a background thread, then drives its navigation
//! controller from the keyboard: stepping, chunk switching, zoom, playback
//! and annotation marks.

pub mod app;
pub mod events;
pub mod ui;
pub mod ui_helpers;

pub use app::App;
