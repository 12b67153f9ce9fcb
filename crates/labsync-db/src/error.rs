//! Errors raised while talking to the identity database.

use thiserror::Error;

/// Failure of a pool, schema or query operation.
///
/// Row-level outcomes (a missing identity, a lost race on a unique
/// external id) are reported by the callers, which know what they were
/// looking for.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database could not be reached or no connection was free.
    #[error("Identity database unreachable: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// The embedded schema could not be applied.
    #[error("Schema migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    #[error("Identity store query failed: {0}")]
    QueryFailed(#[source] sqlx::Error),
}

impl DbError {
    /// Whether retrying later, once the database is back, may succeed.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }
}

/// Whether a `SQLx` error is a unique-constraint violation.
///
/// Two writers inserting the same external id race on
/// `identities_external_id_unique`; the loser sees this.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}
