//! In-process store.
//!
//! Enforces the same keys and references as the `PostgreSQL` schema. A
//! transaction holds the store exclusively, works on a copy of the state and
//! swaps it in on commit, so a dropped transaction leaves no trace.
//! [`MemoryStore::fail_at`] arms a one-shot failure at a chosen operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use labsync_core::{IdentityId, ProfileId, RequestId, RunId};
use labsync_db::{
    Identity, IdentityPatch, IdentityRole, NewIdentity, NewPendingRequest, NewPiProfile,
    NewStudentProfile, NewSyncRun, PendingRequest, PiProfile, RequestResolution, RequestStatus,
    RunCompletion, RunCounters, RunErrorEntry, StudentProfile, SyncRun, SyncRunStatus,
};

use super::{IdentityStore, StoreTransaction};
use crate::error::{StoreError, StoreResult};

/// Operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertIdentity,
    ApplyDirectoryWrite,
    DeactivateAbsent,
    SetRole,
    DeleteIdentity,
    InsertProfile,
    DeleteStudentProfile,
    DeletePiProfile,
    DetachStudents,
    DeleteStudentsOfPi,
    InsertRequest,
    ResolveRequest,
    DeleteRequests,
    InsertRun,
    UpdateRunProgress,
    FinishRun,
    Commit,
}

impl fmt::Display for FailPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    identities: BTreeMap<Uuid, Identity>,
    pi_profiles: BTreeMap<Uuid, PiProfile>,
    student_profiles: BTreeMap<Uuid, StudentProfile>,
    requests: BTreeMap<Uuid, PendingRequest>,
    runs: BTreeMap<Uuid, SyncRun>,
}

type Faults = Arc<StdMutex<Vec<FailPoint>>>;

/// In-memory [`IdentityStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `point` fail with [`StoreError::Injected`].
    pub fn fail_at(&self, point: FailPoint) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(point);
    }

    pub async fn identities(&self) -> Vec<Identity> {
        self.state.lock().await.identities.values().cloned().collect()
    }

    pub async fn identity_by_external_id(&self, external_id: &str) -> Option<Identity> {
        self.state
            .lock()
            .await
            .identities
            .values()
            .find(|i| i.external_id == external_id)
            .cloned()
    }

    pub async fn pi_profiles(&self) -> Vec<PiProfile> {
        self.state.lock().await.pi_profiles.values().cloned().collect()
    }

    pub async fn student_profiles(&self) -> Vec<StudentProfile> {
        self.state
            .lock()
            .await
            .student_profiles
            .values()
            .cloned()
            .collect()
    }

    pub async fn requests(&self) -> Vec<PendingRequest> {
        self.state.lock().await.requests.values().cloned().collect()
    }

    pub async fn runs(&self) -> Vec<SyncRun> {
        self.state.lock().await.runs.values().cloned().collect()
    }

    /// Edit an identity in place, outside any sync pass.
    ///
    /// Returns false if the identity does not exist.
    pub async fn edit_identity<F>(&self, id: IdentityId, edit: F) -> bool
    where
        F: FnOnce(&mut Identity),
    {
        let mut state = self.state.lock().await;
        match state.identities.get_mut(id.as_uuid()) {
            Some(identity) => {
                edit(identity);
                identity.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            work,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    faults: Faults,
}

impl MemoryTransaction {
    fn check(&self, point: FailPoint) -> StoreResult<()> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        match faults.iter().position(|p| *p == point) {
            Some(index) => {
                faults.remove(index);
                Err(StoreError::Injected {
                    point: point.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    fn identity_mut(&mut self, id: IdentityId) -> StoreResult<&mut Identity> {
        self.work
            .identities
            .get_mut(id.as_uuid())
            .ok_or_else(|| StoreError::not_found("identity", id))
    }

    fn require_identity(&self, id: Uuid) -> StoreResult<()> {
        if self.work.identities.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::conflict(format!(
                "identity {id} does not exist"
            )))
        }
    }

    fn pi_profile_of(&self, identity: IdentityId) -> Option<&PiProfile> {
        self.work
            .pi_profiles
            .values()
            .find(|p| p.identity_id == identity.into_uuid())
    }

    fn student_profile_of(&self, identity: IdentityId) -> Option<&StudentProfile> {
        self.work
            .student_profiles
            .values()
            .find(|s| s.identity_id == identity.into_uuid())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_identity(&mut self, id: IdentityId) -> StoreResult<Option<Identity>> {
        Ok(self.work.identities.get(id.as_uuid()).cloned())
    }

    async fn find_identity_by_external_id(
        &mut self,
        external_id: &str,
    ) -> StoreResult<Option<Identity>> {
        Ok(self
            .work
            .identities
            .values()
            .find(|i| i.external_id == external_id)
            .cloned())
    }

    async fn insert_identity(&mut self, input: &NewIdentity) -> StoreResult<Identity> {
        self.check(FailPoint::InsertIdentity)?;
        if self
            .work
            .identities
            .values()
            .any(|i| i.external_id == input.external_id)
        {
            return Err(StoreError::conflict(format!(
                "external id {} already exists",
                input.external_id
            )));
        }
        let identity = input.clone().into_identity(Uuid::new_v4(), Utc::now());
        self.work.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn apply_directory_write(
        &mut self,
        id: IdentityId,
        patch: &IdentityPatch,
        synced_at: DateTime<Utc>,
    ) -> StoreResult<Identity> {
        self.check(FailPoint::ApplyDirectoryWrite)?;
        let identity = self.identity_mut(id)?;
        identity.apply_patch(patch, synced_at);
        Ok(identity.clone())
    }

    async fn deactivate_absent(&mut self, seen: &[String]) -> StoreResult<Vec<Identity>> {
        self.check(FailPoint::DeactivateAbsent)?;
        let seen: HashSet<&str> = seen.iter().map(String::as_str).collect();
        let now = Utc::now();
        let mut deactivated = Vec::new();
        for identity in self.work.identities.values_mut() {
            if identity.is_active && !seen.contains(identity.external_id.as_str()) {
                identity.is_active = false;
                identity.present_in_last_snapshot = false;
                identity.updated_at = now;
                deactivated.push(identity.clone());
            }
        }
        Ok(deactivated)
    }

    async fn set_role(&mut self, id: IdentityId, role: IdentityRole) -> StoreResult<Identity> {
        self.check(FailPoint::SetRole)?;
        let identity = self.identity_mut(id)?;
        identity.role = role;
        identity.updated_at = Utc::now();
        Ok(identity.clone())
    }

    async fn set_roles(&mut self, ids: &[IdentityId], role: IdentityRole) -> StoreResult<u64> {
        self.check(FailPoint::SetRole)?;
        let now = Utc::now();
        let mut count = 0;
        for id in ids {
            if let Some(identity) = self.work.identities.get_mut(id.as_uuid()) {
                identity.role = role;
                identity.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_identity_row(&mut self, id: IdentityId) -> StoreResult<u64> {
        self.check(FailPoint::DeleteIdentity)?;
        let uuid = id.into_uuid();
        if self.pi_profile_of(id).is_some() || self.student_profile_of(id).is_some() {
            return Err(StoreError::conflict(format!(
                "identity {id} is still referenced by a role profile"
            )));
        }
        if self.work.requests.values().any(|r| r.references(uuid)) {
            return Err(StoreError::conflict(format!(
                "identity {id} is still referenced by a pending request"
            )));
        }
        Ok(u64::from(self.work.identities.remove(&uuid).is_some()))
    }

    async fn find_pi_profile(&mut self, identity: IdentityId) -> StoreResult<Option<PiProfile>> {
        Ok(self.pi_profile_of(identity).cloned())
    }

    async fn find_student_profile(
        &mut self,
        identity: IdentityId,
    ) -> StoreResult<Option<StudentProfile>> {
        Ok(self.student_profile_of(identity).cloned())
    }

    async fn insert_pi_profile(&mut self, input: &NewPiProfile) -> StoreResult<PiProfile> {
        self.check(FailPoint::InsertProfile)?;
        self.require_identity(input.identity_id)?;
        if self
            .pi_profile_of(IdentityId::from_uuid(input.identity_id))
            .is_some()
        {
            return Err(StoreError::conflict(format!(
                "identity {} already has a PI profile",
                input.identity_id
            )));
        }
        let profile = input.clone().into_profile(Uuid::new_v4(), Utc::now());
        self.work.pi_profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn insert_student_profile(
        &mut self,
        input: &NewStudentProfile,
    ) -> StoreResult<StudentProfile> {
        self.check(FailPoint::InsertProfile)?;
        self.require_identity(input.identity_id)?;
        if self
            .student_profile_of(IdentityId::from_uuid(input.identity_id))
            .is_some()
        {
            return Err(StoreError::conflict(format!(
                "identity {} already has a student profile",
                input.identity_id
            )));
        }
        if let Some(pi) = input.pi_profile_id {
            if !self.work.pi_profiles.contains_key(&pi) {
                return Err(StoreError::conflict(format!("PI profile {pi} does not exist")));
            }
        }
        let profile = input.clone().into_profile(Uuid::new_v4(), Utc::now());
        self.work
            .student_profiles
            .insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn delete_pi_profile(&mut self, identity: IdentityId) -> StoreResult<u64> {
        self.check(FailPoint::DeletePiProfile)?;
        let Some(profile_id) = self.pi_profile_of(identity).map(|p| p.id) else {
            return Ok(0);
        };
        if self
            .work
            .student_profiles
            .values()
            .any(|s| s.pi_profile_id == Some(profile_id))
        {
            return Err(StoreError::conflict(format!(
                "PI profile {profile_id} is still referenced by student profiles"
            )));
        }
        self.work.pi_profiles.remove(&profile_id);
        Ok(1)
    }

    async fn delete_student_profile(&mut self, identity: IdentityId) -> StoreResult<u64> {
        self.check(FailPoint::DeleteStudentProfile)?;
        let before = self.work.student_profiles.len();
        self.work
            .student_profiles
            .retain(|_, s| s.identity_id != identity.into_uuid());
        Ok((before - self.work.student_profiles.len()) as u64)
    }

    async fn detach_students(&mut self, pi_profile: ProfileId) -> StoreResult<u64> {
        self.check(FailPoint::DetachStudents)?;
        let now = Utc::now();
        let mut count = 0;
        for student in self.work.student_profiles.values_mut() {
            if student.pi_profile_id == Some(pi_profile.into_uuid()) {
                student.pi_profile_id = None;
                student.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_students_of(
        &mut self,
        pi_profile: ProfileId,
    ) -> StoreResult<Vec<IdentityId>> {
        self.check(FailPoint::DeleteStudentsOfPi)?;
        let mut owners = Vec::new();
        self.work.student_profiles.retain(|_, s| {
            if s.pi_profile_id == Some(pi_profile.into_uuid()) {
                owners.push(s.owner());
                false
            } else {
                true
            }
        });
        Ok(owners)
    }

    async fn find_request(&mut self, id: RequestId) -> StoreResult<Option<PendingRequest>> {
        Ok(self.work.requests.get(id.as_uuid()).cloned())
    }

    async fn find_pending_request_for(
        &mut self,
        target: IdentityId,
    ) -> StoreResult<Option<PendingRequest>> {
        Ok(self
            .work
            .requests
            .values()
            .find(|r| r.target_identity_id == target.into_uuid() && !r.status.is_terminal())
            .cloned())
    }

    async fn insert_request(&mut self, input: &NewPendingRequest) -> StoreResult<PendingRequest> {
        self.check(FailPoint::InsertRequest)?;
        self.require_identity(input.requested_by)?;
        self.require_identity(input.target_identity_id)?;
        if self
            .work
            .requests
            .values()
            .any(|r| r.target_identity_id == input.target_identity_id && !r.status.is_terminal())
        {
            return Err(StoreError::conflict(format!(
                "identity {} already has a pending request",
                input.target_identity_id
            )));
        }
        let request = input.clone().into_request(Uuid::new_v4(), Utc::now());
        self.work.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn resolve_request(
        &mut self,
        id: RequestId,
        resolution: &RequestResolution,
    ) -> StoreResult<Option<PendingRequest>> {
        self.check(FailPoint::ResolveRequest)?;
        match self.work.requests.get_mut(id.as_uuid()) {
            Some(request) if request.status == RequestStatus::Pending => {
                request.resolve(resolution);
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_requests_for(&mut self, identity: IdentityId) -> StoreResult<u64> {
        self.check(FailPoint::DeleteRequests)?;
        let before = self.work.requests.len();
        self.work
            .requests
            .retain(|_, r| !r.references(identity.into_uuid()));
        Ok((before - self.work.requests.len()) as u64)
    }

    async fn list_requests(
        &mut self,
        pending_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<PendingRequest>> {
        let mut requests: Vec<_> = self
            .work
            .requests
            .values()
            .filter(|r| !pending_only || r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(requests)
    }

    async fn lock_run_marker(&mut self) -> StoreResult<()> {
        // The transaction already holds the whole store.
        Ok(())
    }

    async fn find_running_run(&mut self) -> StoreResult<Option<SyncRun>> {
        Ok(self.work.runs.values().find(|r| r.is_running()).cloned())
    }

    async fn fail_stale_runs(
        &mut self,
        started_before: DateTime<Utc>,
        message: &str,
    ) -> StoreResult<Vec<SyncRun>> {
        let now = Utc::now();
        let mut failed = Vec::new();
        for run in self.work.runs.values_mut() {
            if run.is_running() && run.started_at < started_before {
                let completion = RunCompletion {
                    status: SyncRunStatus::Failed,
                    finished_at: now,
                    counters: run.counters,
                    errors: run.errors.0.clone(),
                    failure_message: Some(message.to_string()),
                };
                run.complete(&completion);
                failed.push(run.clone());
            }
        }
        Ok(failed)
    }

    async fn insert_run(&mut self, input: &NewSyncRun) -> StoreResult<SyncRun> {
        self.check(FailPoint::InsertRun)?;
        if self.work.runs.values().any(SyncRun::is_running) {
            return Err(StoreError::conflict("a sync run is already running"));
        }
        let run = input.clone().into_run(Uuid::new_v4());
        self.work.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_run_progress(
        &mut self,
        id: RunId,
        counters: &RunCounters,
        errors: &[RunErrorEntry],
    ) -> StoreResult<Option<SyncRun>> {
        self.check(FailPoint::UpdateRunProgress)?;
        match self.work.runs.get_mut(id.as_uuid()) {
            Some(run) if run.is_running() => {
                run.counters = *counters;
                run.errors = Json(errors.to_vec());
                Ok(Some(run.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finish_run(
        &mut self,
        id: RunId,
        completion: &RunCompletion,
    ) -> StoreResult<Option<SyncRun>> {
        self.check(FailPoint::FinishRun)?;
        match self.work.runs.get_mut(id.as_uuid()) {
            Some(run) if run.is_running() => {
                run.complete(completion);
                Ok(Some(run.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_run(&mut self, id: RunId) -> StoreResult<Option<SyncRun>> {
        Ok(self.work.runs.get(id.as_uuid()).cloned())
    }

    async fn list_runs(&mut self, limit: i64) -> StoreResult<Vec<SyncRun>> {
        let mut runs: Vec<_> = self.work.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }

    async fn last_completed_run(&mut self) -> StoreResult<Option<SyncRun>> {
        Ok(self
            .work
            .runs
            .values()
            .filter(|r| r.status == SyncRunStatus::Completed)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.check(FailPoint::Commit)?;
        let MemoryTransaction {
            mut guard, work, ..
        } = *self;
        *guard = work;
        Ok(())
    }
}
