//! Ownership-aware reconciliation of the local identity store.
//!
//! The directory is authoritative for directory-owned fields. Locally-owned
//! fields that carry a meaningful local value are never overwritten by a
//! sync pass, and roles, profiles and pending requests are local state the
//! directory never touches.
//!
//! # Modules
//!
//! - [`ownership`] - Static field ownership table and placeholder policy
//! - [`detector`] - Protected-field detection for one identity
//! - [`record`] - Per-record validation of a directory snapshot
//! - [`merge`] - Write-set computation
//! - [`lifecycle`] - Create, update and reactivate identities
//! - [`cascade`] - Role assignment, removal and identity deletion
//! - [`requests`] - PI-initiated student requests
//! - [`coordinator`] - Sync runs: mutual exclusion, execution, statistics
//! - [`store`] - Transactional storage seam with `PostgreSQL` and in-memory backends

pub mod cascade;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod ownership;
pub mod record;
pub mod requests;
pub mod statistics;
pub mod store;

pub use cascade::{
    CascadeManager, DeactivationSummary, DeletionSummary, PiProfileInput, RoleAssignment,
    StudentProfileInput, UnassignSummary,
};
pub use config::{DependentStudentPolicy, ReconcileConfig};
pub use coordinator::{SyncCoordinator, STALE_RUN_MESSAGE};
pub use detector::{detect_protected, ProtectedSet};
pub use error::{
    CascadeError, CascadeResult, RecordError, StoreError, StoreResult, SyncError, SyncResult,
};
pub use lifecycle::{LifecycleManager, RecordOutcome};
pub use merge::{merge, FieldValue, WriteSet};
pub use ownership::{FieldOwnership, OwnershipPolicy, SyncField};
pub use record::{RecordValidator, ValidatedRecord};
pub use requests::{RequestService, StudentRequestInput};
pub use statistics::{SyncStatistics, MAX_RUN_ERRORS};
pub use store::{FailPoint, IdentityStore, MemoryStore, PgIdentityStore, StoreTransaction};
