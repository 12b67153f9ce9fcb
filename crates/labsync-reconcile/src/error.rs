//! Reconciliation error types.
//!
//! Each concern gets its own enum so callers can tell a skipped record from
//! a failed transaction from a rejected run start.

use thiserror::Error;

use labsync_core::{DirectoryError, IdentityId, RequestId, RunId};
use labsync_db::{DbError, IdentityRole, RequestStatus};

/// A single directory record that cannot be reconciled.
///
/// Never aborts a pass; the record is skipped and reported in the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The record carries no usable external id.
    #[error("Record has no external id (dn: {})", .distinguished_name.as_deref().unwrap_or("<none>"))]
    MissingExternalId { distinguished_name: Option<String> },

    /// A numeric identifier did not parse as a non-negative integer.
    #[error("Record {external_id}: {field} is not a valid number: {value:?}")]
    InvalidNumber {
        external_id: String,
        field: &'static str,
        value: String,
    },

    /// The external id already appeared earlier in the same snapshot.
    #[error("Record {external_id} appears more than once in the snapshot")]
    DuplicateExternalId { external_id: String },
}

impl RecordError {
    /// External id of the offending record, when it had one.
    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        match self {
            Self::MissingExternalId { .. } => None,
            Self::InvalidNumber { external_id, .. } | Self::DuplicateExternalId { external_id } => {
                Some(external_id)
            }
        }
    }

    /// Machine-readable category stored in the run's error list.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingExternalId { .. } => "missing_external_id",
            Self::InvalidNumber { .. } => "invalid_number",
            Self::DuplicateExternalId { .. } => "duplicate_external_id",
        }
    }
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected or failed the statement.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A uniqueness, foreign-key or check constraint was violated.
    #[error("Constraint violation: {message}")]
    Conflict { message: String },

    /// A row expected to exist is gone.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Connection or migration failure from the pool layer.
    #[error(transparent)]
    Pool(#[from] DbError),

    /// Failure injected by the in-memory store.
    #[error("Injected failure at {point}")]
    Injected { point: String },
}

impl StoreError {
    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Check if this error is a constraint violation.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this error is a missing row.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation()
            {
                return Self::Conflict {
                    message: db.message().to_string(),
                };
            }
        }
        Self::Database(err)
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Role, deletion and request-resolution failures.
///
/// These abort the whole operation; nothing is left half-applied.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("Identity not found: {id}")]
    IdentityNotFound { id: IdentityId },

    #[error("Identity {id} is inactive")]
    InactiveIdentity { id: IdentityId },

    #[error("Identity {id} already holds role {current}, cannot assign {requested}")]
    RoleConflict {
        id: IdentityId,
        current: IdentityRole,
        requested: IdentityRole,
    },

    /// The identity is not an active PI with a PI profile.
    #[error("Identity {id} is not an active PI")]
    NotAPi { id: IdentityId },

    /// The PI does not supervise the student.
    #[error("Identity {pi} does not supervise student {student}")]
    NotSupervisor { pi: IdentityId, student: IdentityId },

    #[error("Request not found: {id}")]
    RequestNotFound { id: RequestId },

    #[error("Request {request_id} is already pending for identity {target}")]
    RequestAlreadyPending {
        target: IdentityId,
        request_id: RequestId,
    },

    #[error("Request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Identity {identity} did not raise request {request_id}")]
    NotRequester {
        request_id: RequestId,
        identity: IdentityId,
    },

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CascadeError {
    /// Check if the operation failed because something does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::IdentityNotFound { .. } | Self::RequestNotFound { .. }
        ) || matches!(self, Self::Store(e) if e.is_not_found())
    }

    /// Check if the operation conflicts with current state.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::RoleConflict { .. }
                | Self::RequestAlreadyPending { .. }
                | Self::InvalidTransition { .. }
        ) || matches!(self, Self::Store(e) if e.is_conflict())
    }
}

/// Result type for cascade operations.
pub type CascadeResult<T> = std::result::Result<T, CascadeError>;

/// Sync-run coordinator failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run holds the run-in-progress marker.
    #[error("A sync run is already running: {run_id}")]
    AlreadyRunning { run_id: RunId },

    /// The directory snapshot could not be fetched.
    #[error("Directory source error: {0}")]
    Source(#[from] DirectoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The deactivation sweep failed; the run is marked failed.
    #[error("Deactivation sweep failed: {0}")]
    Sweep(#[source] CascadeError),

    #[error("Sync run not found: {run_id}")]
    RunNotFound { run_id: RunId },

    #[error("Identity not found: {external_id}")]
    IdentityNotFound { external_id: String },

    /// No completed run exists to derive an incremental baseline from.
    #[error("No completed sync run to use as incremental baseline")]
    NoBaseline,
}

impl SyncError {
    /// Check if this error means a run is already in progress.
    #[must_use]
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }

    /// Check if a later attempt could succeed without operator action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AlreadyRunning { .. } => true,
            Self::Source(e) => e.is_transient(),
            Self::Store(StoreError::Database(_)) => true,
            _ => false,
        }
    }
}

/// Result type for coordinator operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_kind_and_external_id() {
        let missing = RecordError::MissingExternalId {
            distinguished_name: Some("cn=x,dc=example,dc=edu".to_string()),
        };
        assert_eq!(missing.kind(), "missing_external_id");
        assert!(missing.external_id().is_none());
        assert!(missing.to_string().contains("cn=x,dc=example,dc=edu"));

        let invalid = RecordError::InvalidNumber {
            external_id: "u1".to_string(),
            field: "uid_number",
            value: "abc".to_string(),
        };
        assert_eq!(invalid.kind(), "invalid_number");
        assert_eq!(invalid.external_id(), Some("u1"));
    }

    #[test]
    fn test_cascade_predicates() {
        let id = IdentityId::new();
        assert!(CascadeError::IdentityNotFound { id }.is_not_found());
        assert!(CascadeError::RoleConflict {
            id,
            current: IdentityRole::Pi,
            requested: IdentityRole::Student,
        }
        .is_conflict());
        assert!(CascadeError::Store(StoreError::conflict("dup")).is_conflict());
        assert!(!CascadeError::InactiveIdentity { id }.is_conflict());
    }

    #[test]
    fn test_sync_error_retryable() {
        assert!(SyncError::AlreadyRunning { run_id: RunId::new() }.is_retryable());
        assert!(SyncError::Source(DirectoryError::Timeout { seconds: 5 }).is_retryable());
        assert!(!SyncError::Source(DirectoryError::AuthenticationFailed).is_retryable());
        assert!(!SyncError::NoBaseline.is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
