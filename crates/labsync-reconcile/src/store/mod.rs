//! Unit-of-work abstraction over the persistent store.
//!
//! Every engine operation runs inside one [`StoreTransaction`]. Nothing it
//! wrote is visible to others until [`StoreTransaction::commit`]; dropping
//! the transaction instead rolls all of it back.

mod memory;
mod postgres;

pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgIdentityStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use labsync_core::{IdentityId, ProfileId, RequestId, RunId};
use labsync_db::{
    Identity, IdentityPatch, IdentityRole, NewIdentity, NewPendingRequest, NewPiProfile,
    NewStudentProfile, NewSyncRun, PendingRequest, PiProfile, RequestResolution, RoleProfile,
    RunCompletion, RunCounters, RunErrorEntry, StudentProfile, SyncRun,
};

use crate::error::StoreResult;

/// Source of transactions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// Row operations available inside one unit of work.
///
/// Lookups of rows that are about to be modified take a row lock where the
/// backend supports it.
#[async_trait]
pub trait StoreTransaction: Send {
    // Identities

    async fn find_identity(&mut self, id: IdentityId) -> StoreResult<Option<Identity>>;

    async fn find_identity_by_external_id(
        &mut self,
        external_id: &str,
    ) -> StoreResult<Option<Identity>>;

    async fn insert_identity(&mut self, input: &NewIdentity) -> StoreResult<Identity>;

    /// Write the patched columns, mark the identity active and present, and
    /// stamp `last_synced_at`, all in one statement.
    async fn apply_directory_write(
        &mut self,
        id: IdentityId,
        patch: &IdentityPatch,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<Identity>;

    /// Deactivate every active identity whose external id is not in `seen`.
    async fn deactivate_absent(&mut self, seen: &[String]) -> StoreResult<Vec<Identity>>;

    async fn set_role(&mut self, id: IdentityId, role: IdentityRole) -> StoreResult<Identity>;

    async fn set_roles(&mut self, ids: &[IdentityId], role: IdentityRole) -> StoreResult<u64>;

    /// Delete the identity row only. Fails if anything still references it.
    async fn delete_identity_row(&mut self, id: IdentityId) -> StoreResult<u64>;

    // Role profiles

    async fn find_pi_profile(&mut self, identity: IdentityId) -> StoreResult<Option<PiProfile>>;

    async fn find_student_profile(
        &mut self,
        identity: IdentityId,
    ) -> StoreResult<Option<StudentProfile>>;

    async fn insert_pi_profile(&mut self, input: &NewPiProfile) -> StoreResult<PiProfile>;

    async fn insert_student_profile(
        &mut self,
        input: &NewStudentProfile,
    ) -> StoreResult<StudentProfile>;

    async fn delete_pi_profile(&mut self, identity: IdentityId) -> StoreResult<u64>;

    async fn delete_student_profile(&mut self, identity: IdentityId) -> StoreResult<u64>;

    /// Clear the PI reference of every student attached to `pi_profile`.
    async fn detach_students(&mut self, pi_profile: ProfileId) -> StoreResult<u64>;

    /// Delete every student profile attached to `pi_profile`, returning the
    /// owning identities.
    async fn delete_students_of(&mut self, pi_profile: ProfileId)
        -> StoreResult<Vec<IdentityId>>;

    // Pending requests

    async fn find_request(&mut self, id: RequestId) -> StoreResult<Option<PendingRequest>>;

    async fn find_pending_request_for(
        &mut self,
        target: IdentityId,
    ) -> StoreResult<Option<PendingRequest>>;

    async fn insert_request(&mut self, input: &NewPendingRequest) -> StoreResult<PendingRequest>;

    /// Resolve a request that is still pending. `None` if it is not.
    async fn resolve_request(
        &mut self,
        id: RequestId,
        resolution: &RequestResolution,
    ) -> StoreResult<Option<PendingRequest>>;

    /// Delete every request authored by or targeting `identity`.
    async fn delete_requests_for(&mut self, identity: IdentityId) -> StoreResult<u64>;

    async fn list_requests(
        &mut self,
        pending_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<PendingRequest>>;

    // Sync runs

    /// Serialize run starts until this transaction ends.
    async fn lock_run_marker(&mut self) -> StoreResult<()>;

    async fn find_running_run(&mut self) -> StoreResult<Option<SyncRun>>;

    /// Fail every running run started before `started_before`.
    async fn fail_stale_runs(
        &mut self,
        started_before: DateTime<Utc>,
        message: &str,
    ) -> StoreResult<Vec<SyncRun>>;

    /// Open a run in `running` status. Fails with a conflict if one exists.
    async fn insert_run(&mut self, input: &NewSyncRun) -> StoreResult<SyncRun>;

    async fn update_run_progress(
        &mut self,
        id: RunId,
        counters: &RunCounters,
        errors: &[RunErrorEntry],
    ) -> StoreResult<Option<SyncRun>>;

    /// Close a running run. `None` if it is no longer running.
    async fn finish_run(
        &mut self,
        id: RunId,
        completion: &RunCompletion,
    ) -> StoreResult<Option<SyncRun>>;

    async fn find_run(&mut self, id: RunId) -> StoreResult<Option<SyncRun>>;

    async fn list_runs(&mut self, limit: i64) -> StoreResult<Vec<SyncRun>>;

    async fn last_completed_run(&mut self) -> StoreResult<Option<SyncRun>>;

    /// Make every write of this unit of work visible.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Load the role profile matching the identity's current role.
pub async fn role_profile_of(
    tx: &mut dyn StoreTransaction,
    identity: &Identity,
) -> StoreResult<Option<RoleProfile>> {
    let id = identity.identity_id();
    Ok(match identity.role {
        IdentityRole::Unassigned => None,
        IdentityRole::Pi => tx.find_pi_profile(id).await?.map(RoleProfile::Pi),
        IdentityRole::Student => tx.find_student_profile(id).await?.map(RoleProfile::Student),
    })
}
