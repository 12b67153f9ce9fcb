//! Run history commands - Show one run or list recent runs

use clap::Args;

use labsync_core::RunId;

use crate::config::Config;
use crate::context::AppContext;
use crate::error::{CliError, CliResult};
use crate::output::{print_json, print_run, run_line};

/// Arguments for the status command
#[derive(Args)]
pub struct StatusArgs {
    /// Run to show. Defaults to the most recent run
    pub run_id: Option<RunId>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the runs command
#[derive(Args)]
pub struct RunsArgs {
    /// Maximum number of runs to list
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(i64).range(1..=1000))]
    pub limit: i64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the status command
pub async fn execute_status(args: StatusArgs, config: &Config) -> CliResult<()> {
    let ctx = AppContext::new(config, "cli", false).await?;
    let run = match args.run_id {
        Some(run_id) => ctx.coordinator.get_run_status(run_id).await?,
        None => ctx
            .coordinator
            .last_run()
            .await?
            .ok_or_else(|| CliError::NotFound("no sync run has been recorded".to_string()))?,
    };

    if args.json {
        return print_json(&run);
    }
    print_run(&run);
    Ok(())
}

/// Execute the runs command
pub async fn execute_list(args: RunsArgs, config: &Config) -> CliResult<()> {
    let ctx = AppContext::new(config, "cli", false).await?;
    let runs = ctx.coordinator.list_runs(args.limit).await?;

    if args.json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No sync runs recorded.");
    }
    for run in &runs {
        println!("{}", run_line(run));
    }
    Ok(())
}
