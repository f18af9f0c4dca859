//! unitreg — batch regression orchestrator for design-unit workareas.
//!
//! ## Commands
//!
//! - `run`: execute one or more analysis categories across the registry
//! - `categories`: list the known analysis categories
//!
//! Exit codes: 0 when every item status is accepted by the configured
//! policy, 1 when any is rejected, 2 on input errors, 130 on cancellation.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn, Level};
use unitreg_core::checkpoint::{config_fingerprint, JournalHeader, JournalStore};
use unitreg_core::registry::{self, RegistryFormat, WorkItem};
use unitreg_core::scheduler::{self, Concurrency, RunConfig, RunEvent};
use unitreg_core::status::AcceptPolicy;
use unitreg_core::summary::RunSummary;
use unitreg_core::{classify, report, RunError};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "unitreg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Batch regression orchestrator for design-unit workareas", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress per-item progress lines
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run analysis categories across the work-item registry
    Run(RunArgs),

    /// List known analysis categories
    Categories,
}

#[derive(Args)]
struct RunArgs {
    /// Analysis categories to run (comma-separated or repeated)
    #[arg(short, long, required = true, value_delimiter = ',')]
    category: Vec<String>,

    /// Registry file, one work item per row
    #[arg(short, long)]
    registry: PathBuf,

    /// Column delimiter in the registry file
    #[arg(long, default_value_t = '\t')]
    delimiter: char,

    /// Column indices for unit,group,target
    #[arg(long, default_value = "0,1,2")]
    columns: String,

    /// Restrict the run to one group
    #[arg(short, long)]
    group: Option<String>,

    /// Restrict the run to one unit
    #[arg(short, long)]
    unit: Option<String>,

    /// Worker count, or "auto" for host-derived
    #[arg(short, long, default_value = "auto")]
    jobs: String,

    /// Preview the work-item list without executing anything
    #[arg(long)]
    dry_run: bool,

    /// Resume from a prior checkpoint journal
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Directory for checkpoint journals
    #[arg(long, default_value = ".unitreg/checkpoints")]
    checkpoint_dir: PathBuf,

    /// Directory for run summary artifacts
    #[arg(long, default_value = ".unitreg/reports")]
    report_dir: PathBuf,

    /// Analysis command (program plus fixed arguments)
    #[arg(long, default_value = "unit-analyze")]
    command: String,

    /// Retry budget for transient failures
    #[arg(long, default_value_t = 1)]
    retries: u32,

    /// Delay between retries, in seconds
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,

    /// Per-job timeout, in seconds
    #[arg(long, default_value_t = 900)]
    timeout: u64,

    /// Also reject MISSING and NO_DATA for the process exit code
    #[arg(long)]
    strict: bool,
}

#[derive(Debug)]
enum RunOutcome {
    Accepted,
    Rejected,
    Cancelled,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    unitreg_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => match cmd_run(&args, cli.quiet).await {
            Ok(RunOutcome::Accepted) => ExitCode::SUCCESS,
            Ok(RunOutcome::Rejected) => ExitCode::from(1),
            Ok(RunOutcome::Cancelled) => ExitCode::from(130),
            Err(e) => {
                error!("{e:#}");
                ExitCode::from(2)
            }
        },
        Commands::Categories => {
            cmd_categories();
            ExitCode::SUCCESS
        }
    }
}

async fn cmd_run(args: &RunArgs, quiet: bool) -> Result<RunOutcome> {
    let (unit_col, group_col, target_col) = parse_columns(&args.columns)?;
    let format = RegistryFormat {
        delimiter: args.delimiter,
        unit_col,
        group_col,
        target_col,
    };

    let items = registry::load(&args.registry, &format)
        .with_context(|| format!("load registry {:?}", args.registry))?;
    let items = registry::filter(items, args.group.as_deref(), args.unit.as_deref())
        .context("filter registry")?;

    for name in &args.category {
        if classify::category(name).is_none() {
            bail!("unknown analysis category: {name} (see `unitreg categories`)");
        }
    }

    let command = parse_command(&args.command)?;
    let jobs = parse_jobs(&args.jobs)?;

    if args.dry_run {
        print_preview(&items, &args.category);
        return Ok(RunOutcome::Accepted);
    }

    if args.resume.is_some() && args.category.len() > 1 {
        bail!("--resume applies to a single-category run");
    }

    let policy = if args.strict {
        AcceptPolicy::strict()
    } else {
        AcceptPolicy::default()
    };

    // Run-level cancellation: ctrl-c stops dispatch and tears down every
    // in-flight job; committed checkpoints survive for a later --resume.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, stopping in-flight jobs");
            let _ = cancel_tx.send(true);
        }
    });

    let mut all_accepted = true;
    for name in &args.category {
        let fingerprint = config_fingerprint(
            name,
            &command,
            &args.registry,
            args.group.as_deref(),
            args.unit.as_deref(),
        );

        let store = match &args.resume {
            Some(path) => {
                let store = JournalStore::open(path)
                    .await
                    .with_context(|| format!("open checkpoint journal {path:?}"))?;
                store
                    .ensure_fingerprint(&fingerprint)
                    .context("resume configuration differs from the journal's")?;
                info!(
                    run_id = %store.header().run_id,
                    resumed = store.completed_count().await,
                    "resuming prior run"
                );
                store
            }
            None => {
                std::fs::create_dir_all(&args.checkpoint_dir)
                    .with_context(|| format!("create {:?}", args.checkpoint_dir))?;
                let run_id = Uuid::new_v4().to_string();
                let path = args.checkpoint_dir.join(format!("{name}-{run_id}.jsonl"));
                let header = JournalHeader {
                    run_id,
                    fingerprint: fingerprint.clone(),
                    category: name.clone(),
                    created_at: Utc::now(),
                };
                JournalStore::create(&path, header)
                    .await
                    .with_context(|| format!("create checkpoint journal {path:?}"))?
            }
        };
        println!("Checkpoint journal: {}", store.path().display());

        let config = RunConfig {
            category: name.clone(),
            command: command.clone(),
            jobs,
            max_retries: args.retries,
            retry_delay: Duration::from_secs(args.retry_delay),
            timeout: Duration::from_secs(args.timeout),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_progress(events_rx, quiet));

        let result = scheduler::run(
            items.clone(),
            config,
            Arc::new(store),
            Some(events_tx),
            cancel_rx.clone(),
        )
        .await;
        let _ = printer.await;

        match result {
            Ok(summary) => {
                write_report(&args.report_dir, name, &summary)?;
                println!();
                print!("{}", report::render_text_table(&summary, &policy));
                if !summary.exit_ok(&policy) {
                    all_accepted = false;
                }
            }
            Err(RunError::Cancelled) => {
                println!("\nRun cancelled; completed items are checkpointed and resumable.");
                return Ok(RunOutcome::Cancelled);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(if all_accepted {
        RunOutcome::Accepted
    } else {
        RunOutcome::Rejected
    })
}

/// List the known analysis categories.
fn cmd_categories() {
    println!("Known analysis categories:");
    for name in classify::category_names() {
        if let Some(cat) = classify::category(name) {
            println!("  {:8} --mode {:4}  {}", cat.name, cat.mode_arg, cat.describe);
        }
    }
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<RunEvent>, quiet: bool) {
    while let Some(event) = rx.recv().await {
        if quiet {
            continue;
        }
        match event {
            RunEvent::ItemStarted { unit, .. } => {
                info!(unit = %unit, "job started");
            }
            RunEvent::ItemSkipped { unit, status, .. } => {
                println!("  - {unit} {} (from checkpoint)", status.as_str());
            }
            RunEvent::ItemFinished { unit, status, .. } => {
                println!("  • {unit} {}", status.as_str());
            }
        }
    }
}

fn print_preview(items: &[WorkItem], categories: &[String]) {
    println!(
        "Dry run: {} work item(s), categories: {}",
        items.len(),
        categories.join(", ")
    );
    for item in items {
        println!("  {}\t{}\t{}", item.unit, item.group, item.target.display());
    }
    println!("\nNo analysis commands were executed.");
}

fn write_report(report_dir: &Path, category: &str, summary: &RunSummary) -> Result<()> {
    let dir = report_dir.join(category);
    std::fs::create_dir_all(&dir).with_context(|| format!("create {dir:?}"))?;
    let path = dir.join("run_summary.json");
    report::write_run_summary_json(&path, summary)?;
    info!(path = %path.display(), "run summary written");
    Ok(())
}

fn parse_jobs(raw: &str) -> Result<Concurrency> {
    if raw.eq_ignore_ascii_case("auto") {
        return Ok(Concurrency::Auto);
    }
    let n: usize = raw
        .parse()
        .with_context(|| format!("invalid --jobs value: {raw}"))?;
    if n == 0 {
        bail!("--jobs must be at least 1");
    }
    Ok(Concurrency::Fixed(n))
}

fn parse_command(raw: &str) -> Result<Vec<String>> {
    let command: Vec<String> = raw.split_whitespace().map(String::from).collect();
    if command.is_empty() {
        bail!("--command must name an executable");
    }
    Ok(command)
}

fn parse_columns(raw: &str) -> Result<(usize, usize, usize)> {
    let cols: Vec<usize> = raw
        .split(',')
        .map(|c| c.trim().parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("invalid --columns value: {raw}"))?;
    if cols.len() != 3 {
        bail!("--columns takes exactly three indices: unit,group,target");
    }
    if cols[0] == cols[1] || cols[0] == cols[2] || cols[1] == cols[2] {
        bail!("--columns indices must be distinct");
    }
    Ok((cols[0], cols[1], cols[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(registry: PathBuf, scratch: &Path) -> RunArgs {
        RunArgs {
            category: vec!["timing".to_string()],
            registry,
            delimiter: '\t',
            columns: "0,1,2".to_string(),
            group: None,
            unit: None,
            jobs: "auto".to_string(),
            dry_run: false,
            resume: None,
            checkpoint_dir: scratch.join("checkpoints"),
            report_dir: scratch.join("reports"),
            command: "/nonexistent-analyzer-for-unitreg-tests".to_string(),
            retries: 0,
            retry_delay: 0,
            timeout: 5,
            strict: false,
        }
    }

    #[test]
    fn test_parse_jobs() {
        assert_eq!(parse_jobs("auto").expect("auto"), Concurrency::Auto);
        assert_eq!(parse_jobs("4").expect("fixed"), Concurrency::Fixed(4));
        assert!(parse_jobs("0").is_err());
        assert!(parse_jobs("many").is_err());
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("unit-analyze --fast").expect("command"),
            vec!["unit-analyze".to_string(), "--fast".to_string()]
        );
        assert!(parse_command("   ").is_err());
    }

    #[test]
    fn test_parse_columns() {
        assert_eq!(parse_columns("0,1,2").expect("columns"), (0, 1, 2));
        assert_eq!(parse_columns("2, 0, 1").expect("columns"), (2, 0, 1));
        assert!(parse_columns("0,1").is_err());
        assert!(parse_columns("0,1,1").is_err());
        assert!(parse_columns("a,b,c").is_err());
    }

    #[test]
    fn test_cli_parses_run_invocation() {
        let cli = Cli::try_parse_from([
            "unitreg", "run", "--category", "timing,drc", "--registry", "reg.tsv", "--jobs", "4",
            "--dry-run",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.category, vec!["timing", "drc"]);
                assert_eq!(args.jobs, "4");
                assert!(args.dry_run);
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = dir.path().join("registry.tsv");
        std::fs::write(&registry, "alu_core\tcpu\t/wa/alu_core\n").expect("write registry");

        let mut args = run_args(registry, dir.path());
        args.dry_run = true;

        let outcome = cmd_run(&args, true).await.expect("dry run");
        assert!(matches!(outcome, RunOutcome::Accepted));
        // Nothing executed, nothing persisted: no journal, no report.
        assert!(!args.checkpoint_dir.exists());
        assert!(!args.report_dir.exists());
    }

    #[tokio::test]
    async fn test_unknown_category_rejected_before_execution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = dir.path().join("registry.tsv");
        std::fs::write(&registry, "alu_core\tcpu\t/wa/alu_core\n").expect("write registry");

        let mut args = run_args(registry, dir.path());
        args.category = vec!["lvs".to_string()];

        let err = cmd_run(&args, true).await.unwrap_err();
        assert!(err.to_string().contains("unknown analysis category"));
        assert!(!args.checkpoint_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_registry_is_an_input_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = run_args(dir.path().join("does-not-exist.tsv"), dir.path());
        let err = cmd_run(&args, true).await.unwrap_err();
        assert!(format!("{err:#}").contains("load registry"));
    }
}
