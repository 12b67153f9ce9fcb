//! Pending student requests.
//!
//! A PI proposes creating or deleting a student; an administrator approves
//! or rejects; the PI may withdraw while the request is open. Approval
//! applies the role change and the status change in one transaction.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use labsync_core::{IdentityId, RequestId};
use labsync_db::{
    IdentityRole, NewPendingRequest, PendingRequest, RequestKind, RequestResolution,
    RequestStatus,
};

use crate::cascade::{
    assign_role_in, delete_identity_in, require_active_pi, require_identity, unassign_role_in,
    RoleAssignment, StudentProfileInput,
};
use crate::config::ReconcileConfig;
use crate::error::{CascadeError, CascadeResult};
use crate::store::{IdentityStore, StoreTransaction};

/// Profile data proposed for a new student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StudentRequestInput {
    #[validate(length(max = 200))]
    pub academic_program: Option<String>,
    #[validate(length(max = 64))]
    pub enrollment_status: Option<String>,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

/// Creates and resolves pending requests.
#[derive(Clone)]
pub struct RequestService {
    store: Arc<dyn IdentityStore>,
    config: Arc<ReconcileConfig>,
}

impl RequestService {
    pub fn new(store: Arc<dyn IdentityStore>, config: Arc<ReconcileConfig>) -> Self {
        Self { store, config }
    }

    /// PI `pi` asks for `target` to become one of its students.
    #[instrument(skip(self, input), fields(pi = %pi, target = %target))]
    pub async fn submit_create_student(
        &self,
        pi: IdentityId,
        target: IdentityId,
        input: StudentRequestInput,
    ) -> CascadeResult<PendingRequest> {
        input.validate()?;

        let mut tx = self.store.begin().await?;
        require_active_pi(tx.as_mut(), pi).await?;

        let identity = require_identity(tx.as_mut(), target).await?;
        if !identity.is_active {
            return Err(CascadeError::InactiveIdentity { id: target });
        }
        if !identity.role.is_unassigned() {
            return Err(CascadeError::RoleConflict {
                id: target,
                current: identity.role,
                requested: IdentityRole::Student,
            });
        }
        ensure_no_open_request(tx.as_mut(), target).await?;

        let request = tx
            .insert_request(&NewPendingRequest {
                kind: RequestKind::CreateStudent,
                requested_by: pi.into_uuid(),
                target_identity_id: target.into_uuid(),
                academic_program: input.academic_program,
                enrollment_status: input.enrollment_status,
                note: input.note,
            })
            .await?;
        tx.commit().await?;

        info!(request_id = %request.id, "Student creation requested");
        Ok(request)
    }

    /// PI `pi` asks for its student `student` to be removed.
    #[instrument(skip(self, note), fields(pi = %pi, student = %student))]
    pub async fn submit_delete_student(
        &self,
        pi: IdentityId,
        student: IdentityId,
        note: Option<String>,
    ) -> CascadeResult<PendingRequest> {
        let mut tx = self.store.begin().await?;
        let pi_profile = require_active_pi(tx.as_mut(), pi).await?;

        require_identity(tx.as_mut(), student).await?;
        let supervised = tx
            .find_student_profile(student)
            .await?
            .is_some_and(|s| s.pi_profile_id == Some(pi_profile.id));
        if !supervised {
            return Err(CascadeError::NotSupervisor { pi, student });
        }
        ensure_no_open_request(tx.as_mut(), student).await?;

        let request = tx
            .insert_request(&NewPendingRequest {
                kind: RequestKind::DeleteStudent,
                requested_by: pi.into_uuid(),
                target_identity_id: student.into_uuid(),
                academic_program: None,
                enrollment_status: None,
                note,
            })
            .await?;
        tx.commit().await?;

        info!(request_id = %request.id, "Student deletion requested");
        Ok(request)
    }

    /// Approve a pending request and apply it.
    ///
    /// When the approved deletion cascades to the identity, the request row
    /// goes with it; the returned value is the request as resolved.
    #[instrument(skip(self, note), fields(request_id = %id))]
    pub async fn approve(
        &self,
        id: RequestId,
        resolved_by: Option<IdentityId>,
        note: Option<String>,
    ) -> CascadeResult<PendingRequest> {
        let mut tx = self.store.begin().await?;
        let resolved = resolve_in(
            tx.as_mut(),
            id,
            RequestStatus::Approved,
            resolved_by,
            note,
        )
        .await?;

        let target = resolved.target();
        match resolved.kind {
            RequestKind::CreateStudent => {
                let assignment = RoleAssignment::Student(StudentProfileInput {
                    pi_identity_id: Some(resolved.requester()),
                    academic_program: resolved.academic_program.clone(),
                    enrollment_status: resolved.enrollment_status.clone(),
                });
                assign_role_in(tx.as_mut(), target, &assignment).await?;
            }
            RequestKind::DeleteStudent if self.config.cascade_identity_on_student_delete => {
                delete_identity_in(tx.as_mut(), target, self.config.dependent_students).await?;
            }
            RequestKind::DeleteStudent => {
                unassign_role_in(tx.as_mut(), target, self.config.dependent_students).await?;
            }
        }
        tx.commit().await?;

        info!(kind = %resolved.kind, target = %target, "Request approved");
        Ok(resolved)
    }

    /// Reject a pending request.
    #[instrument(skip(self, note), fields(request_id = %id))]
    pub async fn reject(
        &self,
        id: RequestId,
        resolved_by: Option<IdentityId>,
        note: Option<String>,
    ) -> CascadeResult<PendingRequest> {
        let mut tx = self.store.begin().await?;
        let resolved = resolve_in(tx.as_mut(), id, RequestStatus::Rejected, resolved_by, note).await?;
        tx.commit().await?;

        info!("Request rejected");
        Ok(resolved)
    }

    /// Withdraw a pending request. Only its author may.
    #[instrument(skip(self), fields(request_id = %id, pi = %pi))]
    pub async fn withdraw(&self, id: RequestId, pi: IdentityId) -> CascadeResult<PendingRequest> {
        let mut tx = self.store.begin().await?;
        let request = tx
            .find_request(id)
            .await?
            .ok_or(CascadeError::RequestNotFound { id })?;
        if request.requester() != pi {
            return Err(CascadeError::NotRequester {
                request_id: id,
                identity: pi,
            });
        }
        let resolved = resolve_in(tx.as_mut(), id, RequestStatus::Withdrawn, Some(pi), None).await?;
        tx.commit().await?;

        info!("Request withdrawn");
        Ok(resolved)
    }

    /// Requests newest first.
    pub async fn list(&self, pending_only: bool, limit: i64) -> CascadeResult<Vec<PendingRequest>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_requests(pending_only, limit).await?)
    }
}

async fn ensure_no_open_request(
    tx: &mut dyn StoreTransaction,
    target: IdentityId,
) -> CascadeResult<()> {
    match tx.find_pending_request_for(target).await? {
        Some(open) => Err(CascadeError::RequestAlreadyPending {
            target,
            request_id: open.request_id(),
        }),
        None => Ok(()),
    }
}

async fn resolve_in(
    tx: &mut dyn StoreTransaction,
    id: RequestId,
    status: RequestStatus,
    resolved_by: Option<IdentityId>,
    note: Option<String>,
) -> CascadeResult<PendingRequest> {
    let request = tx
        .find_request(id)
        .await?
        .ok_or(CascadeError::RequestNotFound { id })?;
    if !request.status.can_transition_to(status) {
        return Err(CascadeError::InvalidTransition {
            id,
            from: request.status,
            to: status,
        });
    }

    let resolution = RequestResolution {
        status,
        resolved_by: resolved_by.map(IdentityId::into_uuid),
        note,
        resolved_at: Utc::now(),
    };
    tx.resolve_request(id, &resolution)
        .await?
        .ok_or(CascadeError::InvalidTransition {
            id,
            from: request.status,
            to: status,
        })
}
