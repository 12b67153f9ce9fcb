//! CLI error types and exit codes

use thiserror::Error;

use labsync_core::DirectoryError;
use labsync_db::DbError;
use labsync_reconcile::{CascadeError, SyncError};

use crate::config::ConfigError;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: General error
/// - 2: Configuration error
/// - 3: Directory or database unreachable
/// - 4: Invalid input or rejected operation
/// - 5: A sync run is already in progress
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Cascade(#[from] CascadeError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Database(e) if e.is_connection_error() => 3,
            CliError::Directory(_) => 3,
            CliError::Sync(e) if e.is_already_running() => 5,
            CliError::Sync(SyncError::Source(_)) => 3,
            CliError::Sync(SyncError::RunNotFound { .. } | SyncError::IdentityNotFound { .. })
            | CliError::Cascade(_)
            | CliError::Validation(_)
            | CliError::NotFound(_) => 4,
            CliError::Database(_) | CliError::Sync(_) | CliError::Output(_) => 1,
        }
    }

    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {self}");
        } else {
            eprintln!("Error: {self}");
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {suggestion}");
            } else {
                eprintln!("\nSuggestion: {suggestion}");
            }
        }
    }

    /// Get a suggested action for this error
    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Config(ConfigError::NoSource) => {
                Some("Set LDAP_HOST (with LDAP_BASE_DN and LDAP_BIND_DN) or SNAPSHOT_FILE.")
            }
            CliError::Database(e) if e.is_connection_error() => {
                Some("Check DATABASE_URL and that PostgreSQL is running.")
            }
            CliError::Sync(SyncError::AlreadyRunning { .. }) => {
                Some("Wait for it to finish; 'labsync status' shows its progress.")
            }
            CliError::Sync(SyncError::NoBaseline) => {
                Some("Run 'labsync full-sync' first or pass --since.")
            }
            _ => None,
        }
    }
}
