//! Sync commands - Run a full or incremental reconciliation pass

use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Args;

use labsync_core::RunId;
use labsync_db::{SyncRun, SyncRunStatus};
use labsync_reconcile::SyncCoordinator;

use crate::config::Config;
use crate::context::AppContext;
use crate::error::{CliError, CliResult};
use crate::output::{print_json, print_key_value, print_run, print_success, print_warning};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Arguments for the full-sync command
#[derive(Args)]
pub struct FullSyncArgs {
    /// Start the run in the background, print its id and follow its progress
    #[arg(long)]
    pub detach: bool,

    /// Output the finished run as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the incremental-sync command
#[derive(Args)]
pub struct IncrementalSyncArgs {
    /// Lower bound (RFC 3339). Defaults to the start of the last completed run
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Start the run in the background, print its id and follow its progress
    #[arg(long)]
    pub detach: bool,

    /// Output the finished run as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the full-sync command
pub async fn execute_full(args: FullSyncArgs, config: &Config) -> CliResult<()> {
    let ctx = AppContext::new(config, "cli", true).await?;
    let coordinator = &ctx.coordinator;

    let run = if args.detach {
        let run_id = coordinator.start_full_sync().await?;
        follow(coordinator, run_id, args.json).await?
    } else {
        coordinator.run_full_sync().await?
    };
    report(&run, args.json)
}

/// Execute the incremental-sync command
pub async fn execute_incremental(args: IncrementalSyncArgs, config: &Config) -> CliResult<()> {
    let ctx = AppContext::new(config, "cli", true).await?;
    let coordinator = &ctx.coordinator;

    let since = match args.since {
        Some(since) => since,
        None => coordinator.incremental_baseline().await?,
    };
    if since > Utc::now() {
        return Err(CliError::Validation(format!(
            "--since {} is in the future",
            since.to_rfc3339()
        )));
    }

    let run = if args.detach {
        let run_id = coordinator.start_incremental_sync(since).await?;
        follow(coordinator, run_id, args.json).await?
    } else {
        coordinator.run_incremental_sync(since).await?
    };
    report(&run, args.json)
}

/// Poll a background run until it leaves `running`.
async fn follow(coordinator: &SyncCoordinator, run_id: RunId, quiet: bool) -> CliResult<SyncRun> {
    if !quiet {
        print_key_value("Started run", &run_id.to_string());
    }
    let mut last_seen = -1;
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let run = coordinator.get_run_status(run_id).await?;
        if !run.is_running() {
            return Ok(run);
        }
        if !quiet && run.counters.records_seen != last_seen {
            last_seen = run.counters.records_seen;
            print_key_value("Progress", &format!("{last_seen} records"));
        }
    }
}

fn report(run: &SyncRun, json: bool) -> CliResult<()> {
    if json {
        return print_json(run);
    }
    match run.status {
        SyncRunStatus::Completed => print_success(&format!("{} sync completed", run.kind)),
        _ => print_warning(&format!("{} sync ended as {}", run.kind, run.status)),
    }
    print_run(run);
    Ok(())
}
