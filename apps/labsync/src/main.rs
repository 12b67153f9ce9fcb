//! labsync - keeps the lab identity store in step with the directory
//!
//! This binary lets operators:
//! - Apply database migrations
//! - Run full and incremental syncs, in the foreground or following a background run
//! - Inspect sync runs and the protected fields of an identity
//! - Assign and remove roles, and delete identities with their dependents
//! - Run the sync scheduler

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod context;
mod error;
mod logging;
mod output;

use config::Config;
use error::CliResult;

/// labsync - Directory reconciliation for the lab identity store
#[derive(Parser)]
#[command(name = "labsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate(commands::migrate::MigrateArgs),

    /// Reconcile against a full directory snapshot, deactivating absent identities
    FullSync(commands::sync::FullSyncArgs),

    /// Reconcile records changed since a point in time
    IncrementalSync(commands::sync::IncrementalSyncArgs),

    /// Show one sync run, or the latest
    Status(commands::runs::StatusArgs),

    /// List recent sync runs
    Runs(commands::runs::RunsArgs),

    /// Show which locally-owned fields of an identity a sync will not touch
    Protected(commands::identity::ProtectedArgs),

    /// Assign a role and create its profile
    AssignRole(commands::identity::AssignRoleArgs),

    /// Remove the role of an identity and its profile
    UnassignRole(commands::identity::UnassignRoleArgs),

    /// Delete an identity with its profiles and requests
    DeleteIdentity(commands::identity::DeleteIdentityArgs),

    /// Run scheduled syncs until interrupted
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = Config::from_env()?;
    logging::init_logging(&config.rust_log, config.log_format);

    match cli.command {
        Commands::Migrate(args) => commands::migrate::execute(args, &config).await,
        Commands::FullSync(args) => commands::sync::execute_full(args, &config).await,
        Commands::IncrementalSync(args) => commands::sync::execute_incremental(args, &config).await,
        Commands::Status(args) => commands::runs::execute_status(args, &config).await,
        Commands::Runs(args) => commands::runs::execute_list(args, &config).await,
        Commands::Protected(args) => commands::identity::execute_protected(args, &config).await,
        Commands::AssignRole(args) => commands::identity::execute_assign(args, &config).await,
        Commands::UnassignRole(args) => commands::identity::execute_unassign(args, &config).await,
        Commands::DeleteIdentity(args) => commands::identity::execute_delete(args, &config).await,
        Commands::Serve(args) => commands::serve::execute(args, &config).await,
    }
}
