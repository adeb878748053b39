//! Longrec Toolbox - terminal navigator for long multimodal recordings
//!
//! This is the main entry point when running `cargo run`. It opens a session
//! file and shows the synchronized cursor, the display window and the state
//! of every modality, with keyboard navigation across chunk boundaries.
//!
//! # Usage
//!
//! ```bash
//! longrec-toolbox session.json
//! longrec-toolbox session.json --annotations marks.txt --stamp chunk
//! ```

use std::io;
use std::panic;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use longrec_toolbox::annotation::StampEncoding;
use longrec_toolbox::cli::SessionArgs;
use ratatui::{backend::CrosstermBackend, Terminal};

mod tui;

use tui::{
    events::{action_for, Event, EventHandler},
    ui::render,
    App,
};

#[derive(Parser)]
#[command(name = "longrec-toolbox")]
#[command(about = "Navigate a long multimodal recording in the terminal")]
#[command(version)]
struct Args {
    #[command(flatten)]
    session: SessionArgs,

    /// Append intervals closed with `m` to this file
    #[arg(long, short = 'a')]
    annotations: Option<PathBuf>,

    /// Encoding of annotation stamps
    #[arg(long, default_value = "datetime", value_parser = ["datetime", "chunk"])]
    stamp: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    // config errors are reported before the terminal is taken over
    let config = args.session.load()?;
    let encoding = args.stamp.parse::<StampEncoding>()?;

    // Display license notice before entering TUI
    if !args.session.quiet {
        longrec_toolbox::display_license_notice("longrec-toolbox");
    }

    // Setup panic hook to restore terminal on panic
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        cleanup_terminal();
        original_hook(panic_info);
    }));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let app = App::new(config, args.session.session.clone(), args.annotations, encoding);
    let result = run_app(&mut terminal, app);

    // Cleanup
    cleanup_terminal();

    result
}

fn cleanup_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, mut app: App) -> Result<()> {
    let events = EventHandler::default();
    let mut needs_full_redraw = true;

    loop {
        if needs_full_redraw {
            terminal.clear()?;
            needs_full_redraw = false;
        }

        terminal.draw(|f| render(f, &app))?;

        match events.next()? {
            Event::Key(key) => {
                if let Some(action) = action_for(&key) {
                    app.apply(action);
                }
            }
            Event::Resize => needs_full_redraw = true,
            Event::Tick => {
                let mode = app.mode;
                app.on_tick();
                if app.mode != mode {
                    needs_full_redraw = true;
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
