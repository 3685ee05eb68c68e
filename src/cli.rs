use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::backup::paths::resolve_paths;
use crate::commands::sync::SyncOptions;
use crate::commands::{self, CommandReport};
use crate::logging;

/// Exit status when a command completes but reports issues.
const EXIT_ISSUES: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "shoebox",
    version,
    about = "One-way archival sync of a photo and video tree into an object-storage bucket"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload every local file whose derived key is not yet in the bucket.
    Sync(SyncArgs),
    /// Show capture time and derived key for files, without touching the bucket.
    Inspect {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show resolved paths, configuration and tool availability.
    Status,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Local directory to back up.
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long)]
    bucket: Option<String>,
    #[arg(long)]
    storage_class: Option<String>,
    /// `aws-cli` or `s3`.
    #[arg(long)]
    backend: Option<String>,
    /// List and decide, but upload nothing and write no outcome logs.
    #[arg(long)]
    dry_run: bool,
    /// No per-file progress lines.
    #[arg(long, short)]
    quiet: bool,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{}: {}",
        report.command,
        if report.ok { "ok" } else { "completed with issues" }
    );
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let backup_paths = resolve_paths()?;
    logging::init(&backup_paths.process_log);

    let report = match cli.command {
        Command::Sync(args) => commands::sync::run(&SyncOptions {
            root: args.root,
            bucket: args.bucket,
            storage_class: args.storage_class,
            backend: args.backend,
            dry_run: args.dry_run,
            quiet: args.quiet || cli.json,
        })?,
        Command::Inspect { paths } => commands::inspect::run(&paths)?,
        Command::Status => commands::status::run()?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        tracing::warn!(command = %report.command, issues = report.issues.len(), "command completed with issues");
        std::process::exit(EXIT_ISSUES);
    }
    Ok(())
}
