//! Embedded schema for the identity store.

use sqlx::migrate::Migrator;
use tracing::info;

use crate::error::DbError;
use crate::pool::DbPool;

/// Identities, role profiles, pending requests and sync runs, in that order.
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every migration the database has not seen yet.
///
/// Safe to call on each start; applied versions are skipped.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    let latest = MIGRATOR.iter().map(|m| m.version).max().unwrap_or_default();
    info!(latest_version = latest, "Applying identity store migrations");

    MIGRATOR
        .run(pool.inner())
        .await
        .map_err(DbError::MigrationFailed)?;

    info!(latest_version = latest, "Identity store schema is current");
    Ok(())
}
