//! Batchward main entry point
//!
//! This is the command-line interface for the batchward batch supervisor.

use anyhow::Context;
use batchward::config::{load_config, load_config_with_hash, verify_config_hash, Config};
use batchward::output::{load_statistics, print_statistics};
use batchward::relaunch::{LaunchSpec, RelaunchLoop, RelaunchPolicy};
use batchward::storage::open_storage;
use batchward::{BatchOutcome, BatchReport, Supervisor};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Batchward: a supervised, resumable batch processor
///
/// Batchward walks a set of resources, runs an extractor over each one on a
/// pool of consumer threads, abandons consumers that stop making progress,
/// and records every outcome so an interrupted batch resumes where it left off.
#[derive(Parser, Debug)]
#[command(name = "batchward")]
#[command(version = "1.0.0")]
#[command(about = "A supervised, resumable batch processor", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single incarnation and exit with its outcome code
    Run(RunArgs),

    /// Run incarnations as child processes, relaunching after crashes
    Launch(ConfigArg),

    /// Show statistics from the database and exit
    Stats(ConfigArg),

    /// Validate config and show the resolved settings without processing anything
    Check(ConfigArg),
}

#[derive(Args, Debug)]
struct ConfigArg {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArg,

    /// Refuse to run unless the config file still has this SHA-256 hash
    #[arg(long, value_name = "HEX")]
    config_hash: Option<String>,

    /// Incarnation number assigned by the relaunch loop
    #[arg(long, default_value_t = 0)]
    incarnation: u32,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run(args) => std::process::exit(handle_run(&args)),
        Command::Launch(args) => {
            let code = handle_launch(&args.config, cli.verbose, cli.quiet)?;
            std::process::exit(code)
        }
        Command::Stats(args) => handle_stats(&args.config),
        Command::Check(args) => handle_check(&args.config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            // Only show errors
            EnvFilter::new("error")
        } else {
            match verbose {
                0 => EnvFilter::new("batchward=info,warn"),
                1 => EnvFilter::new("batchward=debug,info"),
                2 => EnvFilter::new("batchward=trace,debug"),
                _ => EnvFilter::new("trace"),
            }
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Handles `run`: one incarnation, returning the process exit code
///
/// Anything that stops the incarnation from starting is an environment
/// problem, so it exits CRASHED_NO_RESTART.
fn handle_run(args: &RunArgs) -> i32 {
    match start_incarnation(args) {
        Ok(report) => report.outcome.exit_code(),
        Err(e) => {
            tracing::error!("Incarnation could not start: {:#}", e);
            BatchOutcome::CrashedNoRestart.exit_code()
        }
    }
}

fn start_incarnation(args: &RunArgs) -> anyhow::Result<BatchReport> {
    let path = &args.config.config;
    if let Some(expected) = &args.config_hash {
        verify_config_hash(path, expected)?;
    }

    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)?;
    tracing::info!(
        incarnation = args.incarnation,
        "Configuration loaded successfully (hash: {})",
        hash
    );

    let sink = open_storage(Path::new(&config.output.database_path)).with_context(|| {
        format!("cannot open database {}", config.output.database_path)
    })?;

    let report = Supervisor::from_config(&config, Arc::new(sink))?
        .with_run_identity(hash, args.incarnation)
        .run()?;
    Ok(report)
}

/// Handles `launch`: re-executes this binary under the relaunch loop
fn handle_launch(config_path: &Path, verbose: u8, quiet: bool) -> anyhow::Result<i32> {
    let config_path = config_path
        .canonicalize()
        .with_context(|| format!("cannot resolve {}", config_path.display()))?;
    let (config, hash) = load_config_with_hash(&config_path)?;
    let policy = RelaunchPolicy::from_config(&config);

    let program = std::env::current_exe().context("cannot locate the batchward executable")?;
    let mut spec = LaunchSpec::new(program);
    if quiet {
        spec = spec.arg("--quiet");
    } else if verbose > 0 {
        spec = spec.arg(format!("-{}", "v".repeat(verbose as usize)));
    }
    let spec = spec
        .arg("run")
        .arg("--config")
        .arg(config_path.as_os_str())
        .args(["--config-hash", hash.as_str()]);

    tracing::info!(
        max_restarts = policy.max_restarts,
        "Launching batch from {}",
        config_path.display()
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let summary = runtime.block_on(RelaunchLoop::new(spec, policy).run())?;

    let outcome = summary.final_outcome();
    tracing::info!(
        incarnations = summary.incarnations.len(),
        stop_reason = ?summary.stop_reason,
        outcome = %outcome,
        "Relaunch loop finished in {:.1}s",
        summary.elapsed.as_secs_f64()
    );
    Ok(outcome.exit_code())
}

/// Handles `stats`: shows statistics from the database
fn handle_stats(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    println!("Database: {}\n", config.output.database_path);

    // Open the database
    let sink = open_storage(Path::new(&config.output.database_path))?;

    // Load statistics
    let stats = load_statistics(&sink)?;

    // Print statistics
    print_statistics(&stats);

    Ok(())
}

/// Handles `check`: validates config and shows the resolved settings
fn handle_check(config_path: &Path) -> anyhow::Result<()> {
    let (config, hash) = load_config_with_hash(config_path)?;
    print_check(&config, &hash);
    Ok(())
}

fn print_check(config: &Config, hash: &str) {
    let supervisor = config.supervisor();
    let policy = RelaunchPolicy::from_config(config);

    println!("=== Batchward Configuration Check ===\n");

    println!("Supervisor:");
    println!("  Consumers: {}", supervisor.num_consumers);
    println!("  Max queue size: {}", supervisor.max_queue_size);
    println!(
        "  Timeout threshold: {}ms",
        supervisor.timeout_threshold.as_millis()
    );
    println!(
        "  Timeout check pulse: {}ms",
        supervisor.timeout_check_pulse.as_millis()
    );
    println!(
        "  Max timed-out consumers: {}",
        supervisor.max_timed_out_consumers
    );
    match supervisor.max_alive_time {
        Some(limit) => println!("  Max alive time: {}s", limit.as_secs()),
        None => println!("  Max alive time: unlimited"),
    }
    println!(
        "  Pause on early termination: {}ms",
        supervisor.pause_on_early_termination.as_millis()
    );
    println!(
        "  Status report interval: {}ms",
        supervisor.status_report_interval.as_millis()
    );
    println!(
        "  Max attempts per resource: {}",
        supervisor.max_resource_attempts
    );

    println!("\nSource:");
    println!("  {:?}", config.source);

    println!("\nExtractor:");
    println!("  {:?}", config.extractor);

    println!("\nReporter:");
    println!("  {:?}", config.reporter);

    println!("\nInterrupter:");
    println!("  {:?}", config.interrupter);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nRelaunch:");
    println!("  Max restarts: {}", policy.max_restarts);
    match policy.max_total {
        Some(total) => println!("  Max total time: {}s", total.as_secs()),
        None => println!("  Max total time: unlimited"),
    }
    println!("  Restart delay: {}ms", policy.restart_delay.as_millis());
    match policy.kill_after {
        Some(deadline) => println!("  Kill after: {}s", deadline.as_secs()),
        None => println!("  Kill after: never"),
    }

    println!("\n✓ Configuration is valid (hash: {})", hash);
}
