#![warn(missing_docs)]
//! jobpool CLI Library
//!
//! The pool orchestrator and the command-line front end for binaries that
//! register jobs. Call `jobpool::run()` (or `jobpool_cli::run()`) from
//! `main`; the same binary doubles as the worker process the pool spawns.
//!
//! # Example
//!
//! ```ignore
//! use jobpool::prelude::*;
//!
//! #[job]
//! fn square(args: &JobArgs) -> anyhow::Result<i64> {
//!     let x = args.int(0)?;
//!     Ok(x * x)
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     jobpool::run()
//! }
//! ```

mod batch;
mod config;
pub mod guard;
mod pool;
mod report;
mod supervisor;

pub use batch::{BatchEntry, BatchFile, parse_cli_value};
pub use config::*;
pub use guard::{GuardError, GuardInfo, RunGuard};
pub use pool::*;
pub use report::{
    EntryResult, OutcomeEntry, OutputFormat, Report, ReportMeta, format_human_output,
    generate_json_report,
};
pub use supervisor::{SupervisorError, WorkerHandle};

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use jobpool_core::{JobArgs, JobDescriptor, WorkerMain, registered_jobs};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// jobpool CLI arguments
#[derive(Parser, Debug)]
#[command(name = "jobpool")]
#[command(author, version, about = "jobpool - ordered parallel job execution")]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding the run guard (default: where pool.toml lives, else cwd)
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,

    /// Use every configured worker process
    #[arg(long, global = true)]
    pub full_throttle: bool,

    /// Explicit worker count (capped at the full-throttle count)
    #[arg(long, short = 'p', global = true)]
    pub processes: Option<usize>,

    /// Keep records of earlier batches in this pool
    #[arg(long, global = true)]
    pub keep_results: bool,

    /// Completion / cancellation check interval (e.g. "500ms")
    #[arg(long, global = true)]
    pub poll_interval: Option<String>,

    /// Output format: human or json
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Internal: Run as worker process (used by the pool)
    #[arg(long = "jobpool-worker", hide = true)]
    pub jobpool_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the jobs listed in a TOML or JSON batch file
    Run {
        /// Batch file (`.json` for JSON, anything else is TOML)
        batch: PathBuf,
    },
    /// Run one function over many single-argument jobs
    Map {
        /// Registered job id
        function: String,
        /// One argument per job, parsed as JSON or taken as a string
        args: Vec<String>,
        /// Raise worker priority for these jobs
        #[arg(long)]
        high_priority: bool,
    },
    /// List registered job functions
    List,
    /// Report whether a batch is running in the project root
    Status,
    /// Cancel the running batch by removing its run guard
    Abort,
    /// Write a default pool.toml to the current directory
    Init,
}

/// Run the jobpool CLI with the process arguments.
/// This is the main entry point for job binaries.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the jobpool CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Handle worker mode first (before any other initialization)
    if cli.jobpool_worker {
        return run_worker_mode();
    }

    let default_filter = if cli.verbose {
        "jobpool=debug"
    } else {
        "jobpool=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(default_filter))
        .try_init();

    // Discover pool.toml configuration (CLI flags override)
    let (config, config_root) = match PoolConfig::discover() {
        Some((config, root)) => (config, Some(root)),
        None => (PoolConfig::default(), None),
    };

    let Some(command) = cli.command.as_ref() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Commands::Init = command {
        return init_config();
    }
    if let Commands::List = command {
        list_jobs();
        return Ok(());
    }

    let pool = build_pool(&cli, &config, config_root)?;
    match command {
        Commands::Run { batch } => {
            let jobs = BatchFile::load(batch)?.into_jobs();
            run_batch(&cli, &config, &pool, jobs)
        }
        Commands::Map {
            function,
            args,
            high_priority,
        } => {
            let jobs = args
                .iter()
                .map(|raw| {
                    JobDescriptor::with_args(JobArgs::new().arg(parse_cli_value(raw)))
                        .high_priority(*high_priority)
                        .bind(function.as_str())
                })
                .collect();
            run_batch(&cli, &config, &pool, jobs)
        }
        Commands::Status => {
            show_status(&pool);
            Ok(())
        }
        Commands::Abort => {
            if pool.abort()? {
                println!("Abort requested: removed {}", pool.guard_path().display());
            } else {
                println!("No batch running in {}", pool.project_root().display());
            }
            Ok(())
        }
        Commands::List | Commands::Init => Ok(()),
    }
}

/// Run as a worker process (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobpool=warn"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();

    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

/// Layer pool.toml values and CLI overrides into a [`Pool`]
fn build_pool(cli: &Cli, config: &PoolConfig, config_root: Option<PathBuf>) -> anyhow::Result<Pool> {
    let project_root = match cli.project_root.clone().or(config_root) {
        Some(root) => root,
        None => {
            let cwd = std::env::current_dir()?;
            tracing::warn!(
                cwd = %cwd.display(),
                "no pool.toml found; using the current directory as project root"
            );
            cwd
        }
    };

    let poll_interval = match &cli.poll_interval {
        Some(raw) => PoolConfig::parse_duration(raw)?,
        None => config.poll_interval(),
    };

    let mut builder = Pool::builder()
        .project_root(project_root)
        .guard_file(config.pool.guard_file.clone())
        .poll_interval(poll_interval);
    if let Some(n) = config.pool.safe_processes {
        builder = builder.safe_processes(n);
    }
    if let Some(n) = config.pool.full_throttle_processes {
        builder = builder.full_throttle_processes(n);
    }
    Ok(builder.build()?)
}

fn init_config() -> anyhow::Result<()> {
    let path = std::env::current_dir()?.join(CONFIG_FILE);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(&path, PoolConfig::default_toml())?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn list_jobs() {
    println!("Registered jobs:");
    let jobs = registered_jobs();
    for job in &jobs {
        let description = if job.description.is_empty() {
            String::new()
        } else {
            format!(" - {}", job.description)
        };
        println!("├── {}{} ({}:{})", job.id, description, job.file, job.line);
    }
    println!("{} jobs found.", jobs.len());
}

fn show_status(pool: &Pool) {
    let counts = pool.process_counts();
    println!("Project root: {}", pool.project_root().display());
    println!(
        "Workers: {} safe, {} full throttle",
        counts.safe, counts.full_throttle
    );
    match guard::inspect(pool.guard_path()) {
        Some(info) => {
            let pid = info.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
            let since = info
                .started
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown time".into());
            println!("Status: running (pid {pid}, since {since})");
        }
        None => println!("Status: idle"),
    }
}

fn run_batch(
    cli: &Cli,
    config: &PoolConfig,
    pool: &Pool,
    jobs: Vec<JobDescriptor>,
) -> anyhow::Result<()> {
    let format_name = cli.format.as_deref().unwrap_or(&config.output.format);
    let format: OutputFormat = format_name.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let options = RunOptions {
        reset_last_results: !cli.keep_results,
        full_throttle: cli.full_throttle,
        processes_requested: cli.processes,
    };

    let functions: Arc<Vec<String>> = Arc::new(
        jobs.iter()
            .map(|j| j.function().unwrap_or_default().to_string())
            .collect(),
    );
    let outcomes = Arc::new(Mutex::new(Vec::with_capacity(jobs.len())));

    let progress = ProgressBar::new(jobs.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let callbacks = {
        let (ok_sink, err_sink) = (outcomes.clone(), outcomes.clone());
        let (ok_names, err_names) = (functions.clone(), functions.clone());
        let (ok_bar, err_bar) = (progress.clone(), progress.clone());
        Callbacks::new()
            .on_success(move |index, value| {
                push_outcome(&ok_sink, &ok_names, index, EntryResult::Value(value));
                ok_bar.inc(1);
            })
            .on_error(move |index, failure| {
                err_bar.set_message(format!("job {index} failed"));
                push_outcome(&err_sink, &err_names, index, EntryResult::Error(failure));
                err_bar.inc(1);
            })
    };

    let summary = pool.start_multi_processing(jobs, callbacks, options)?;
    progress.finish_and_clear();

    let outcomes = std::mem::take(&mut *outcomes.lock().unwrap_or_else(|p| p.into_inner()));
    let report = Report {
        meta: ReportMeta::new(pool.project_root(), pool.worker_binary()),
        summary,
        outcomes,
    };

    let output = match format {
        OutputFormat::Json => generate_json_report(&report)?,
        OutputFormat::Human => format_human_output(&report),
    };

    if let Some(ref path) = cli.output {
        let path = resolve_output_path(path, pool.project_root(), config);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&path)?;
        file.write_all(output.as_bytes())?;
        println!("Report written to: {}", path.display());
    } else {
        print!("{}", output);
    }

    let summary = &report.summary;
    if summary.status == BatchStatus::Aborted || summary.failed > 0 {
        if summary.status == BatchStatus::Aborted {
            eprintln!("\nBatch aborted: run guard removed");
        }
        if summary.failed > 0 {
            eprintln!("\n{} job(s) failed", summary.failed);
        }
        std::io::stdout().flush()?;
        std::process::exit(1);
    }

    Ok(())
}

fn push_outcome(
    sink: &Mutex<Vec<OutcomeEntry>>,
    functions: &[String],
    index: usize,
    result: EntryResult,
) {
    let function = functions.get(index).cloned().unwrap_or_default();
    sink.lock()
        .unwrap_or_else(|p| p.into_inner())
        .push(OutcomeEntry {
            index,
            function,
            result,
        });
}

/// Relative `--output` paths land in `[output] directory` under the project root
fn resolve_output_path(path: &Path, project_root: &Path, config: &PoolConfig) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(&config.output.directory).join(path)
    }
}
