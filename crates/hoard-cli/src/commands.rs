use std::io::{self, BufRead, Write};

use anyhow::{bail, Context};
use colored::Colorize;
use hoard_engine::{
    run_backup, BackupConfig, BackupMode, BackupObserver, BackupSummary, ErrorKind, FileAction,
    RunPlan,
};
use tracing::debug;

use crate::cli::{Cli, OutputFormat};

/// Run the backup described by `cli`. Returns whether it finished without
/// errors.
pub fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = base_config(&cli)?;
    {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        resolve_paths(&cli, &mut config, &mut input, &mut output)?;
    }
    apply_flags(&cli, &mut config);
    debug!(?config, "configuration resolved");

    let reporter = Reporter {
        narrate: cli.format == OutputFormat::Text && !cli.quiet,
        source: config.source.display().to_string(),
        destination: config.destination.display().to_string(),
    };
    let summary = run_backup(&config, &reporter).context("backup aborted")?;

    match cli.format {
        OutputFormat::Text => {
            let mut stdout = io::stdout().lock();
            write_summary(&mut stdout, &summary, config.dedup)?;
            if summary.is_clean() {
                writeln!(stdout, "\n{}", "Backup completed successfully!".green().bold())?;
            } else {
                writeln!(stdout, "\n{}", "Backup completed with errors!".red().bold())?;
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(summary.is_clean())
}

fn base_config(cli: &Cli) -> anyhow::Result<BackupConfig> {
    match &cli.config {
        Some(path) => BackupConfig::load(path)
            .with_context(|| format!("cannot use configuration {}", path.display())),
        None => Ok(BackupConfig::default()),
    }
}

/// Fill in source and destination from the command line, prompting for any
/// still missing. Prompting also asks whether the run should be incremental,
/// unless `--full` was given.
fn resolve_paths<R: BufRead, W: Write>(
    cli: &Cli,
    config: &mut BackupConfig,
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<()> {
    if let Some(source) = &cli.source {
        config.source = source.clone();
    }
    if let Some(destination) = &cli.destination {
        config.destination = destination.clone();
    }

    let mut prompted = false;
    if config.source.as_os_str().is_empty() {
        config.source = prompt(input, output, "Enter source directory path: ")?.into();
        prompted = true;
    }
    if config.destination.as_os_str().is_empty() {
        config.destination = prompt(input, output, "Enter destination directory path: ")?.into();
        prompted = true;
    }
    if prompted && !cli.full {
        let answer = prompt(input, output, "Incremental backup? (y/n): ")?;
        config.mode = if is_yes(&answer) {
            BackupMode::Incremental
        } else {
            BackupMode::Full
        };
    }

    if config.source.as_os_str().is_empty() || config.destination.as_os_str().is_empty() {
        bail!(
            "source and destination paths are required\n\n\
             Usage: hoard <SOURCE> <DEST> [--full]\n\
             Example: hoard ~/Documents /mnt/backup"
        );
    }
    Ok(())
}

fn apply_flags(cli: &Cli, config: &mut BackupConfig) {
    if cli.full {
        config.mode = BackupMode::Full;
    }
    if cli.no_dedup {
        config.dedup = false;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<String> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn is_yes(answer: &str) -> bool {
    matches!(answer, "y" | "Y" | "yes" | "Yes" | "YES")
}

/// Narrates the run on stdout; errors always go to stderr.
struct Reporter {
    narrate: bool,
    source: String,
    destination: String,
}

impl BackupObserver for Reporter {
    fn on_run_start(&self, plan: &RunPlan) {
        if !self.narrate {
            return;
        }
        let mode = match (plan.effective_mode(), plan.requested) {
            (BackupMode::Incremental, _) => "INCREMENTAL".to_string(),
            (BackupMode::Full, BackupMode::Incremental) => {
                "FULL (no previous backup found)".to_string()
            }
            (BackupMode::Full, BackupMode::Full) => "FULL".to_string(),
        };
        println!("{}", "========================================".dimmed());
        println!("  {}", "HOARD BACKUP".bold());
        println!("{}", "========================================".dimmed());
        println!("Source:         {}", self.source);
        println!("Destination:    {}", self.destination);
        println!("Mode:           {}", mode.cyan());
        println!(
            "Deduplication:  {}",
            if plan.dedup { "enabled" } else { "disabled" }
        );
        if plan.workers > 1 {
            println!("Workers:        {}", plan.workers);
        }
        println!("{}\n", "========================================".dimmed());
    }

    fn on_directory(&self, relative_dir: &str) {
        if self.narrate && !relative_dir.is_empty() {
            println!("\nEntering directory: {}", relative_dir.bold());
        }
    }

    fn on_classified(&self, relative_path: &str, action: FileAction) {
        if !self.narrate {
            return;
        }
        let tag = action_tag(action);
        let tag = match action {
            FileAction::New => tag.green(),
            FileAction::Modified => tag.yellow(),
            FileAction::Deduplicated { .. } => tag.cyan(),
            FileAction::Forced => tag.blue(),
            FileAction::Skipped(_) => tag.dimmed(),
        };
        println!("  {tag} {relative_path}");
    }

    fn on_error(&self, kind: ErrorKind, relative_path: &str, error: &dyn std::fmt::Display) {
        let label = if kind.is_fatal_to_status() {
            "ERROR".red().bold()
        } else {
            "WARNING".yellow().bold()
        };
        eprintln!("  {label} {kind}: {}: {error}", display_path(relative_path));
    }
}

fn action_tag(action: FileAction) -> &'static str {
    match action {
        FileAction::New => "[NEW]",
        FileAction::Modified => "[MODIFIED]",
        FileAction::Deduplicated { .. } => "[DEDUP]",
        FileAction::Forced => "[FULL]",
        FileAction::Skipped(_) => "[SKIP]",
    }
}

fn display_path(relative: &str) -> &str {
    if relative.is_empty() {
        "."
    } else {
        relative
    }
}

/// Render a byte count with binary units and two decimals, e.g. `1.50 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

fn write_summary<W: Write>(out: &mut W, summary: &BackupSummary, dedup: bool) -> io::Result<()> {
    writeln!(out, "\n========================================")?;
    writeln!(out, "  BACKUP COMPLETE")?;
    writeln!(out, "========================================")?;
    writeln!(out, "Files processed:      {}", summary.files_processed)?;
    writeln!(out, "Files copied:         {}", summary.files_copied)?;
    writeln!(out, "  - New files:        {}", summary.files_new)?;
    writeln!(out, "  - Modified files:   {}", summary.files_modified)?;
    writeln!(out, "Files skipped:        {}", summary.files_skipped)?;
    if dedup {
        writeln!(out, "Files deduplicated:   {}", summary.files_deduped)?;
        writeln!(out, "Blobs stored:         {}", summary.blobs_stored)?;
    }
    writeln!(out, "Directories created:  {}", summary.directories_created)?;
    writeln!(out, "Errors:               {}", summary.errors)?;
    if summary.persist_warnings > 0 {
        writeln!(out, "Warnings:             {}", summary.persist_warnings)?;
    }
    writeln!(out, "Total size:           {}", format_bytes(summary.total_bytes))?;
    writeln!(out, "Bytes copied:         {}", format_bytes(summary.bytes_copied))?;
    if dedup {
        writeln!(out, "Data stored:          {}", format_bytes(summary.bytes_stored))?;
        writeln!(out, "Space saved (dedup):  {}", format_bytes(summary.bytes_deduplicated))?;
        if summary.total_bytes > 0 {
            writeln!(out, "Deduplication rate:   {:.1}%", summary.dedup_ratio() * 100.0)?;
        }
    }
    writeln!(out, "========================================")?;
    Ok(())
}
