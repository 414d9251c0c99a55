//! Account Dispatcher - Main Entry Point
//!
//! Loads the scheduler settings, identity roster, and workload file, then
//! runs the workload through the scheduler against a dry-run executor.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use account_dispatcher::config::{IdentityRoster, SchedulerSettings, Workload};
use account_dispatcher::scheduler::{self, DryRunExecutor, TaskScheduler, WorkHandle, WorkStatus};

/// Multi-account call scheduler for platform automation workloads.
#[derive(Parser, Debug)]
#[command(name = "account_dispatcher")]
#[command(about = "Schedule batched platform calls across a pool of accounts")]
#[command(version)]
struct Args {
    /// Path to the scheduler settings JSON file.
    #[arg(short, long, default_value = "settings.json")]
    settings: String,

    /// Path to the identity roster JSON file.
    #[arg(short, long, default_value = "accounts.json")]
    accounts: String,

    /// Path to the workload JSON file.
    #[arg(short, long, default_value = "workload.json")]
    workload: String,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Simulated per-call latency in milliseconds for the dry-run executor.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Generate example configuration files and exit.
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    if args.generate_config {
        return generate_example_config();
    }

    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Settings are optional on disk; environment overrides win either way.
    let settings = if Path::new(&args.settings).exists() {
        SchedulerSettings::load_from_file(&args.settings)
            .context("Failed to load scheduler settings")?
            .with_env_overrides()
    } else {
        info!("No settings file at {}, using defaults", args.settings);
        SchedulerSettings::from_env_with_defaults()
    };
    settings
        .validate()
        .context("Scheduler settings validation failed")?;

    let roster =
        IdentityRoster::load_from_file(&args.accounts).context("Failed to load identity roster")?;
    roster.validate().context("Identity roster validation failed")?;

    let workload = Workload::load_from_file(&args.workload).context("Failed to load workload")?;
    if workload.is_empty() {
        warn!("Workload is empty, nothing to do");
        return Ok(());
    }

    info!(
        "Loaded {} identities and {} requests (caps: {}/min, {}/hour)",
        roster.len(),
        workload.len(),
        settings.rate.per_minute,
        settings.rate.per_hour
    );

    let executor = Arc::new(DryRunExecutor::new(Duration::from_millis(args.latency_ms)));
    let dispatcher = TaskScheduler::new(settings, roster.to_pool(), executor);
    let breaker = Arc::clone(dispatcher.breaker());
    let identities = dispatcher.rotator().identities().await;

    let (handle, rx) = scheduler::channel(256);
    let scheduler_task = tokio::spawn(dispatcher.run(rx));

    // Submit the workload, honoring each entry's earliest-eligible time.
    let now = Utc::now();
    let mut work: Vec<WorkHandle> = Vec::with_capacity(workload.len());
    for entry in &workload.requests {
        let submitted = match entry.delay_from(now) {
            Some(delay) => handle.submit_after(entry.to_request(), delay).await,
            None => handle.submit(entry.to_request()).await,
        };
        work.push(submitted.context("Failed to submit work item")?);
    }

    info!("Submitted {} work items. Use Ctrl+C to stop early.", work.len());

    tokio::select! {
        () = wait_all(&mut work) => {
            info!("Workload complete");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    handle.shutdown().await;
    let _ = scheduler_task.await;

    summarize(&work);
    for id in &identities {
        let stats = breaker.stats(id).await;
        debug!(
            "Identity {}: breaker {}, {} successes, {} recent failures",
            id, stats.state, stats.success_count, stats.failure_count
        );
    }

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Generates example configuration files.
fn generate_example_config() -> Result<()> {
    SchedulerSettings::default().save_to_file("settings.example.json")?;
    IdentityRoster::example().save_to_file("accounts.example.json")?;
    Workload::example().save_to_file("workload.example.json")?;

    println!("✓ Example configuration written to:");
    println!("  settings.example.json");
    println!("  accounts.example.json");
    println!("  workload.example.json");
    println!("\nTo run a workload:");
    println!("1. Copy the example files and drop the .example suffix");
    println!("2. Edit the account roster and workload to your liking");
    println!("3. Run: account_dispatcher");

    Ok(())
}

/// Waits for every work item to reach a terminal status.
async fn wait_all(work: &mut [WorkHandle]) {
    for handle in work {
        let status = handle.wait().await;
        debug!("Work item {} finished: {}", handle.id(), status);
    }
}

/// Logs a final tally of work item outcomes.
fn summarize(work: &[WorkHandle]) {
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut canceled = 0usize;
    let mut pending = 0usize;

    for handle in work {
        match handle.status() {
            WorkStatus::Succeeded => succeeded += 1,
            WorkStatus::Failed { .. } => failed += 1,
            WorkStatus::Canceled => canceled += 1,
            _ => pending += 1,
        }
    }

    info!(
        "Done: {} succeeded, {} failed, {} canceled, {} never ran",
        succeeded, failed, canceled, pending
    );
}
