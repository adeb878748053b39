//! Longrec Navigate - headless navigation over stdin commands
//!
//! Opens a session and drives its navigation controller from line commands,
//! answering every command with a `STATUS` line. Meant for scripting and for
//! embedding the engine in another program.
//!
//! # Commands
//!
//! ```text
//! SEEK <datetime | chunk_sample>   jump (clamped to the recording)
//! STEP <samples> | STEP <secs>s    move relative to the cursor
//! CHUNK <index> | NEXT | PREV      switch chunk
//! WINDOW <secs>                    display window width
//! ZOOM IN | OUT | ALL | <factor>   zoom around the cursor
//! PLAY | PAUSE | TICK <secs>       playback
//! STATUS                           print the cursor
//! STAMP                            print both encodings of the cursor
//! MARK                             open / close an annotation interval
//! QUIT
//! ```

use anyhow::Result;
use clap::Parser;
use longrec_toolbox::annotation::StampEncoding;
use longrec_toolbox::cli::SessionArgs;
use longrec_toolbox::commands::{self, CommandOptions};
use longrec_toolbox::session::Session;
use longrec_toolbox::timestamp;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "longrec-navigate")]
#[command(about = "Navigate a recording session with commands read from stdin")]
#[command(version)]
struct Args {
    #[command(flatten)]
    session: SessionArgs,

    /// Append intervals closed with MARK to this file
    #[arg(long, short = 'a')]
    annotations: Option<PathBuf>,

    /// Encoding of annotation stamps
    #[arg(long, default_value = "datetime", value_parser = ["datetime", "chunk"])]
    stamp: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    longrec_toolbox::init_logging(args.session.quiet);
    let config = args.session.load()?;
    let tz = config.time_zone_offset()?;

    let mut session = Session::open(config)?;
    for issue in &session.issues {
        eprintln!("WARNING {}", issue);
    }

    let plan = session.plan.clone();
    println!(
        "READY chunks={} start={} end={} reference_hz={}",
        plan.chunk_count(),
        timestamp::format_datetime(plan.span.global_start),
        timestamp::format_datetime(plan.span.global_end),
        session.controller.reference().frequency
    );

    let options = CommandOptions {
        time_zone: tz,
        annotation_file: args.annotations.clone(),
        encoding: args.stamp.parse::<StampEncoding>()?,
    };
    let stdin = io::stdin();
    commands::handle_commands(&mut session.controller, stdin.lock(), io::stdout(), &options)
}
