//! Longrec Plan - synchronization plan of a recording session
//!
//! Builds the catalogs of a session, computes the global recording span and
//! prints, for every chunk and modality, the segments that assemble it
//! (source file ranges and gaps).
//!
//! # Usage
//!
//! ```bash
//! longrec-plan session.json
//! longrec-plan session.json --chunk 3 --verbose
//! longrec-plan session.json --json > plan.json
//! longrec-plan session.json --cache-dir /tmp/longrec
//! ```

use anyhow::Result;
use clap::Parser;
use longrec_toolbox::cache::PlanCache;
use longrec_toolbox::cli::SessionArgs;
use longrec_toolbox::planner::{ChunkPlan, SegmentKind};
use longrec_toolbox::session;
use longrec_toolbox::timestamp;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "longrec-plan")]
#[command(about = "Compute and print the synchronization plan of a recording session")]
#[command(version)]
struct Args {
    #[command(flatten)]
    session: SessionArgs,

    /// Only print this chunk
    #[arg(long)]
    chunk: Option<usize>,

    /// Print every segment, not only chunks with gaps
    #[arg(short, long)]
    verbose: bool,

    /// Print the whole plan as JSON instead of the report
    #[arg(long)]
    json: bool,

    /// Also write the per-chunk plan files to a disposable cache under this directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    longrec_toolbox::init_logging(args.session.quiet || args.json);
    let config = args.session.load()?;

    let layout = session::build_layout(&config)?;
    let plan = &layout.plan;

    if args.json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    if !args.session.quiet {
        longrec_toolbox::display_license_notice("longrec-plan");
    }

    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("║              Long Recording Synchronization Plan               ║");
    println!("╚════════════════════════════════════════════════════════════════╝");
    println!();
    println!("RECORDING SPAN");
    println!("\tStart:\t\t{}", timestamp::format_datetime(plan.span.global_start));
    println!("\tEnd:\t\t{}", timestamp::format_datetime(plan.span.global_end));
    println!("\tDuration:\t{:.3} s", plan.span.duration_secs());
    println!("\tEnd policy:\t{:?}", config.end_policy);
    println!("\tChunks:\t\t{} x {} s", plan.chunk_count(), plan.chunk_duration);
    println!(
        "\tReference:\t{} ({} Hz)",
        layout.reference.modality.as_ref().map_or("(none)", |m| m.as_str()),
        layout.reference.frequency
    );
    println!();

    if args.verbose {
        println!("SETTINGS");
        println!("{}", args.session.to_settings_json(&config)?);
        println!();
    }

    if !layout.issues.is_empty() {
        println!("CATALOG ISSUES ({})", layout.issues.len());
        for issue in &layout.issues {
            println!("\t{}", issue);
        }
        println!();
    }

    println!("CHUNKS");
    for chunk in &plan.chunks {
        if args.chunk.is_some_and(|c| c != chunk.index) {
            continue;
        }
        println!(
            "  Chunk {} [{} + {:.3} s]",
            chunk.index,
            timestamp::format_datetime(chunk.start),
            chunk.duration
        );
        for entry in plan.chunk_entries(chunk.index) {
            print_entry(entry, args.verbose);
        }
    }

    if let Some(dir) = &args.cache_dir {
        let cache = PlanCache::create(Some(dir))?;
        cache.store_plan(plan)?;
        let files = cache.chunk_files()?;
        println!();
        println!("CACHE");
        println!("\tDirectory:\t{}", cache.path().display());
        println!("\tSession:\t{}", cache.session_id());
        println!("\tChunk files:\t{}", files.len());
        println!("\t(removed on exit)");
    }

    Ok(())
}

fn print_entry(entry: &ChunkPlan, verbose: bool) {
    let frequency = match entry.frequency {
        Some(f) => format!("{} Hz", f),
        None => "irregular".to_string(),
    };
    let marker = if entry.is_all_gap() {
        "no data"
    } else if entry.gap_duration() > 0.0 {
        "gaps"
    } else {
        "complete"
    };
    println!(
        "    {} ({}, {} samples): {} [{:.3} s data, {:.3} s gap]",
        entry.modality,
        frequency,
        entry.sample_count,
        marker,
        entry.covered_duration() - entry.gap_duration(),
        entry.gap_duration()
    );
    if !verbose && entry.gap_duration() == 0.0 {
        return;
    }
    for segment in &entry.segments {
        match &segment.kind {
            SegmentKind::Source {
                path,
                local_offset,
                length,
            } => println!(
                "\t@{:>10.3}s  {} [{} + {}]",
                segment.chunk_offset,
                path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default(),
                local_offset,
                length
            ),
            SegmentKind::TimeRange {
                path,
                local_start,
                local_end,
                closed_end,
            } => println!(
                "\t@{:>10.3}s  {} [{:.3} s, {:.3} s{}",
                segment.chunk_offset,
                path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default(),
                local_start,
                local_end,
                if *closed_end { "]" } else { ")" }
            ),
            SegmentKind::Gap { length } => println!(
                "\t@{:>10.3}s  gap {:.3} s ({} samples)",
                segment.chunk_offset, segment.duration, length
            ),
        }
    }
}
