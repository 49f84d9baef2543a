use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mri::error::Error;
use mri::report::{Section, diff_reports, format_sections, latest_report, load_report};

#[derive(Parser)]
#[command(
    name = "mri",
    about = "Inspect call-profiling reports saved by instrumented platform applications",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a saved report (the latest in --dir if no path is given).
    Show {
        /// Path to a report file.
        report: Option<PathBuf>,

        /// Directory searched for the latest report.
        #[arg(long, default_value = "mri-reports")]
        dir: PathBuf,

        /// Only show these sections: stacks, methods, triggers (repeatable).
        #[arg(long = "section", value_name = "NAME")]
        sections: Vec<Section>,
    },
    /// Compare method self times between two reports.
    Diff {
        /// Earlier report file.
        a: PathBuf,
        /// Later report file.
        b: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Show {
            report,
            dir,
            sections,
        } => cmd_show(report, &dir, sections),
        Commands::Diff { a, b } => cmd_diff(&a, &b),
    }
}

fn cmd_show(report: Option<PathBuf>, dir: &Path, sections: Vec<Section>) -> Result<(), Error> {
    let path = match report {
        Some(path) => path,
        None => latest_report(dir)?,
    };
    tracing::debug!(path = %path.display(), "loading report");
    let report = load_report(&path)?;
    let sections = if sections.is_empty() {
        Section::ALL.to_vec()
    } else {
        sections
    };
    anstream::print!("{}", format_sections(&report, &sections));
    Ok(())
}

fn cmd_diff(a: &Path, b: &Path) -> Result<(), Error> {
    let before = load_report(a)?;
    let after = load_report(b)?;
    anstream::print!("{}", diff_reports(&before, &after));
    Ok(())
}
