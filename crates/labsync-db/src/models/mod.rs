//! Database models for labsync entities.

pub mod identity;
pub mod pending_request;
pub mod role_profile;
pub mod sync_run;

pub use identity::{Identity, IdentityPatch, IdentityRole, NewIdentity};
pub use pending_request::{
    NewPendingRequest, PendingRequest, RequestKind, RequestResolution, RequestStatus,
};
pub use role_profile::{NewPiProfile, NewStudentProfile, PiProfile, RoleProfile, StudentProfile};
pub use sync_run::{
    NewSyncRun, RunCompletion, RunCounters, RunErrorEntry, SyncRun, SyncRunKind, SyncRunStatus,
};
