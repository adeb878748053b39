//! Longrec Inspect - catalog report for a recording session
//!
//! Scans every modality of a session file and prints the files found, their
//! start times, durations and frequencies, followed by every problem found
//! (bad file name timestamps, unreadable files, overlaps, frequency mismatches).
//!
//! # Usage
//!
//! ```bash
//! longrec-inspect session.json
//! longrec-inspect session.json --modality ECG --verbose
//! ```

use anyhow::Result;
use clap::Parser;
use longrec_toolbox::catalog::{CatalogBuild, FileCatalog};
use longrec_toolbox::cli::SessionArgs;
use longrec_toolbox::config::{FrequencySpec, ModalityConfig};
use longrec_toolbox::timestamp;

#[derive(Parser)]
#[command(name = "longrec-inspect")]
#[command(about = "List the files of every modality of a recording session")]
#[command(version)]
struct Args {
    #[command(flatten)]
    session: SessionArgs,

    /// Show every file instead of the first and last of each modality
    #[arg(short, long)]
    verbose: bool,

    /// Filter to specific modality id(s)
    #[arg(short, long)]
    modality: Option<Vec<String>>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    longrec_toolbox::init_logging(args.session.quiet);
    let config = args.session.load()?;
    let tz = config.time_zone_offset()?;

    if !args.session.quiet {
        longrec_toolbox::display_license_notice("longrec-inspect");
    }

    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("║              Long Recording Catalog Inspector                  ║");
    println!("╚════════════════════════════════════════════════════════════════╝");
    println!();
    println!("Session: {}", args.session.session.display());
    println!();

    let selected: Vec<_> = config
        .modalities
        .iter()
        .filter(|m| {
            args.modality
                .as_ref()
                .is_none_or(|filter| filter.contains(&m.id))
        })
        .collect();

    println!("MODALITIES ({} selected)", selected.len());
    println!();

    // modalities following the reference frequency are cataloged last
    let follows_reference = |m: &ModalityConfig| {
        matches!(m.frequency, Some(FrequencySpec::Value(v)) if v == FrequencySpec::SAME_AS_REFERENCE)
    };
    let mut builds: Vec<Option<CatalogBuild>> = selected.iter().map(|_| None).collect();
    for (idx, modality) in selected.iter().enumerate().filter(|(_, m)| !follows_reference(m)) {
        builds[idx] = Some(FileCatalog::build(modality, tz, None)?);
    }
    let reference_frequency = selected
        .iter()
        .zip(&builds)
        .filter(|(m, _)| config.reference_modality.as_ref().is_none_or(|r| r == &m.id))
        .find_map(|(_, b)| b.as_ref().and_then(|b| b.catalog.frequency()));
    for (idx, modality) in selected.iter().enumerate().filter(|(_, m)| follows_reference(m)) {
        builds[idx] = Some(FileCatalog::build(modality, tz, reference_frequency)?);
    }

    let mut all_issues = Vec::new();
    let mut total_files = 0;

    for (idx, (modality, build)) in selected.iter().zip(builds).enumerate() {
        let Some(build) = build else {
            continue;
        };
        let catalog = build.catalog;

        let is_last = idx + 1 == selected.len();
        let prefix = if is_last { "  └─" } else { "  ├─" };
        let indent = if is_last { "     " } else { "  │  " };

        println!("{} {} ({:?})", prefix, modality.id, modality.kind);
        println!("{}├─ Directory: {}", indent, modality.directory.display());
        println!("{}├─ Pattern: {}", indent, modality.pattern);
        match catalog.frequency() {
            Some(f) => println!("{}├─ Frequency: {} Hz", indent, f),
            None if catalog.files.iter().any(|f| f.is_irregular()) => {
                println!("{}├─ Frequency: irregular", indent)
            }
            None => println!("{}├─ Frequency: -", indent),
        }
        let total: f64 = catalog.files.iter().map(|f| f.duration).sum();
        println!("{}├─ Data: {:.3} s in {} file(s)", indent, total, catalog.len());
        if let (Some(first), Some(last)) = (catalog.first_start(), catalog.last_end()) {
            println!(
                "{}├─ Span: {} → {}",
                indent,
                timestamp::format_datetime(first),
                timestamp::format_datetime(last)
            );
        }
        print_files(&catalog, indent, args.verbose);
        println!();

        total_files += catalog.len();
        all_issues.extend(build.issues);
    }

    println!("SUMMARY");
    println!("\tFiles cataloged:\t{}", total_files);
    println!(
        "\tFiles excluded:\t\t{}",
        all_issues.iter().filter(|i| i.excluded && i.path.is_some()).count()
    );
    println!("\tWarnings:\t\t{}", all_issues.iter().filter(|i| !i.excluded).count());

    if !all_issues.is_empty() {
        println!();
        println!("ISSUES");
        for issue in &all_issues {
            println!("\t{}", issue);
        }
    }

    Ok(())
}

fn print_files(catalog: &FileCatalog, indent: &str, verbose: bool) {
    let n = catalog.files.len();
    for (i, file) in catalog.files.iter().enumerate() {
        if !verbose && n > 2 && i == 1 {
            println!("{}│  ... {} more file(s)", indent, n - 2);
        }
        if !verbose && n > 2 && i > 0 && i + 1 < n {
            continue;
        }
        let name = file
            .path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        println!(
            "{}│  {}  start={}  samples={}  duration={:.3}s",
            indent,
            name,
            timestamp::format_datetime(file.start_time),
            file.sample_count,
            file.duration
        );
    }
}
