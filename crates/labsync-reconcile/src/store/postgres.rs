//! `PostgreSQL` implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use labsync_core::{IdentityId, ProfileId, RequestId, RunId};
use labsync_db::{
    DbPool, Identity, IdentityPatch, IdentityRole, NewIdentity, NewPendingRequest, NewPiProfile,
    NewStudentProfile, NewSyncRun, PendingRequest, PiProfile, RequestResolution, RunCompletion,
    RunCounters, RunErrorEntry, StudentProfile, SyncRun,
};

use super::{IdentityStore, StoreTransaction};
use crate::error::{StoreError, StoreResult};

/// Store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: DbPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

/// One database transaction. Rolled back by sqlx when dropped uncommitted.
struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn find_identity(&mut self, id: IdentityId) -> StoreResult<Option<Identity>> {
        Ok(Identity::find_by_id_for_update(&mut *self.tx, id.into_uuid()).await?)
    }

    async fn find_identity_by_external_id(
        &mut self,
        external_id: &str,
    ) -> StoreResult<Option<Identity>> {
        Ok(Identity::find_by_external_id_for_update(&mut *self.tx, external_id).await?)
    }

    async fn insert_identity(&mut self, input: &NewIdentity) -> StoreResult<Identity> {
        Ok(Identity::insert(&mut *self.tx, input).await?)
    }

    async fn apply_directory_write(
        &mut self,
        id: IdentityId,
        patch: &IdentityPatch,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<Identity> {
        Identity::apply_directory_write(&mut *self.tx, id.into_uuid(), patch, synced_at)
            .await?
            .ok_or_else(|| StoreError::not_found("identity", id))
    }

    #[instrument(skip(self, seen), fields(seen = seen.len()))]
    async fn deactivate_absent(&mut self, seen: &[String]) -> StoreResult<Vec<Identity>> {
        Ok(Identity::deactivate_absent(&mut *self.tx, seen).await?)
    }

    async fn set_role(&mut self, id: IdentityId, role: IdentityRole) -> StoreResult<Identity> {
        Identity::set_role(&mut *self.tx, id.into_uuid(), role)
            .await?
            .ok_or_else(|| StoreError::not_found("identity", id))
    }

    async fn set_roles(&mut self, ids: &[IdentityId], role: IdentityRole) -> StoreResult<u64> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        Ok(Identity::set_role_many(&mut *self.tx, &ids, role).await?)
    }

    async fn delete_identity_row(&mut self, id: IdentityId) -> StoreResult<u64> {
        Ok(Identity::delete(&mut *self.tx, id.into_uuid()).await?)
    }

    async fn find_pi_profile(&mut self, identity: IdentityId) -> StoreResult<Option<PiProfile>> {
        Ok(PiProfile::find_by_identity(&mut *self.tx, identity.into_uuid()).await?)
    }

    async fn find_student_profile(
        &mut self,
        identity: IdentityId,
    ) -> StoreResult<Option<StudentProfile>> {
        Ok(StudentProfile::find_by_identity(&mut *self.tx, identity.into_uuid()).await?)
    }

    async fn insert_pi_profile(&mut self, input: &NewPiProfile) -> StoreResult<PiProfile> {
        Ok(PiProfile::insert(&mut *self.tx, input).await?)
    }

    async fn insert_student_profile(
        &mut self,
        input: &NewStudentProfile,
    ) -> StoreResult<StudentProfile> {
        Ok(StudentProfile::insert(&mut *self.tx, input).await?)
    }

    async fn delete_pi_profile(&mut self, identity: IdentityId) -> StoreResult<u64> {
        Ok(PiProfile::delete_by_identity(&mut *self.tx, identity.into_uuid()).await?)
    }

    async fn delete_student_profile(&mut self, identity: IdentityId) -> StoreResult<u64> {
        Ok(StudentProfile::delete_by_identity(&mut *self.tx, identity.into_uuid()).await?)
    }

    async fn detach_students(&mut self, pi_profile: ProfileId) -> StoreResult<u64> {
        Ok(StudentProfile::detach_from_pi(&mut *self.tx, pi_profile.into_uuid()).await?)
    }

    async fn delete_students_of(
        &mut self,
        pi_profile: ProfileId,
    ) -> StoreResult<Vec<IdentityId>> {
        let owners =
            StudentProfile::delete_by_pi_profile(&mut *self.tx, pi_profile.into_uuid()).await?;
        Ok(owners.into_iter().map(IdentityId::from_uuid).collect())
    }

    async fn find_request(&mut self, id: RequestId) -> StoreResult<Option<PendingRequest>> {
        Ok(PendingRequest::find_by_id_for_update(&mut *self.tx, id.into_uuid()).await?)
    }

    async fn find_pending_request_for(
        &mut self,
        target: IdentityId,
    ) -> StoreResult<Option<PendingRequest>> {
        Ok(PendingRequest::find_pending_for_target(&mut *self.tx, target.into_uuid()).await?)
    }

    async fn insert_request(&mut self, input: &NewPendingRequest) -> StoreResult<PendingRequest> {
        Ok(PendingRequest::insert(&mut *self.tx, input).await?)
    }

    async fn resolve_request(
        &mut self,
        id: RequestId,
        resolution: &RequestResolution,
    ) -> StoreResult<Option<PendingRequest>> {
        Ok(PendingRequest::resolve_pending(&mut *self.tx, id.into_uuid(), resolution).await?)
    }

    async fn delete_requests_for(&mut self, identity: IdentityId) -> StoreResult<u64> {
        Ok(PendingRequest::delete_for_identity(&mut *self.tx, identity.into_uuid()).await?)
    }

    async fn list_requests(
        &mut self,
        pending_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<PendingRequest>> {
        Ok(PendingRequest::list(&mut *self.tx, pending_only, limit).await?)
    }

    async fn lock_run_marker(&mut self) -> StoreResult<()> {
        Ok(SyncRun::acquire_start_lock(&mut *self.tx).await?)
    }

    async fn find_running_run(&mut self) -> StoreResult<Option<SyncRun>> {
        Ok(SyncRun::find_running(&mut *self.tx).await?)
    }

    async fn fail_stale_runs(
        &mut self,
        started_before: DateTime<Utc>,
        message: &str,
    ) -> StoreResult<Vec<SyncRun>> {
        Ok(SyncRun::fail_stale(&mut *self.tx, started_before, message).await?)
    }

    async fn insert_run(&mut self, input: &NewSyncRun) -> StoreResult<SyncRun> {
        Ok(SyncRun::insert(&mut *self.tx, input).await?)
    }

    async fn update_run_progress(
        &mut self,
        id: RunId,
        counters: &RunCounters,
        errors: &[RunErrorEntry],
    ) -> StoreResult<Option<SyncRun>> {
        Ok(SyncRun::update_progress(&mut *self.tx, id.into_uuid(), counters, errors).await?)
    }

    async fn finish_run(
        &mut self,
        id: RunId,
        completion: &RunCompletion,
    ) -> StoreResult<Option<SyncRun>> {
        Ok(SyncRun::finish(&mut *self.tx, id.into_uuid(), completion).await?)
    }

    async fn find_run(&mut self, id: RunId) -> StoreResult<Option<SyncRun>> {
        Ok(SyncRun::find_by_id(&mut *self.tx, id.into_uuid()).await?)
    }

    async fn list_runs(&mut self, limit: i64) -> StoreResult<Vec<SyncRun>> {
        Ok(SyncRun::list_recent(&mut *self.tx, limit).await?)
    }

    async fn last_completed_run(&mut self) -> StoreResult<Option<SyncRun>> {
        Ok(SyncRun::last_completed(&mut *self.tx).await?)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.commit().await?)
    }
}
