//! Migrate command - Apply pending database migrations

use clap::Args;

use crate::config::Config;
use crate::context::connect;
use crate::error::CliResult;
use crate::output::print_success;

/// Arguments for the migrate command
#[derive(Args)]
pub struct MigrateArgs {}

/// Execute the migrate command
pub async fn execute(_args: MigrateArgs, config: &Config) -> CliResult<()> {
    let pool = connect(config).await?;
    labsync_db::run_migrations(&pool).await?;
    print_success("Database schema is up to date");
    Ok(())
}
