//! Cascade integrity manager.
//!
//! Role assignment, role removal, identity deletion and the deactivation
//! sweep each run as one unit of work. The `*_in` functions do the work
//! inside a caller-supplied transaction so the request workflow can combine
//! them with its own writes; [`CascadeManager`] wraps each in its own
//! transaction.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use validator::{Validate, ValidationErrors};

use labsync_core::IdentityId;
use labsync_db::{
    Identity, IdentityRole, NewPiProfile, NewStudentProfile, PiProfile, RoleProfile,
};

use crate::config::DependentStudentPolicy;
use crate::error::{CascadeError, CascadeResult, StoreResult};
use crate::store::{IdentityStore, StoreTransaction};

/// Profile data for a new PI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PiProfileInput {
    #[validate(length(max = 200))]
    pub department: Option<String>,
    #[validate(length(max = 200))]
    pub lab_name: Option<String>,
}

/// Profile data for a new student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StudentProfileInput {
    /// Supervising PI. Must be an active identity holding a PI profile.
    pub pi_identity_id: Option<IdentityId>,
    #[validate(length(max = 200))]
    pub academic_program: Option<String>,
    #[validate(length(max = 64))]
    pub enrollment_status: Option<String>,
}

/// A role together with the profile data it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleAssignment {
    Pi(PiProfileInput),
    Student(StudentProfileInput),
}

impl RoleAssignment {
    #[must_use]
    pub fn role(&self) -> IdentityRole {
        match self {
            Self::Pi(_) => IdentityRole::Pi,
            Self::Student(_) => IdentityRole::Student,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::Pi(input) => input.validate(),
            Self::Student(input) => input.validate(),
        }
    }
}

/// Result of removing a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnassignSummary {
    pub previous_role: IdentityRole,
    pub profile_removed: bool,
    /// Students whose PI reference was cleared.
    pub students_detached: u64,
    /// Students whose profile was deleted and role reset.
    pub students_reset: Vec<IdentityId>,
}

/// Result of deleting an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionSummary {
    pub identity_id: IdentityId,
    pub external_id: String,
    pub role: IdentityRole,
    pub student_profiles_removed: u64,
    pub pi_profiles_removed: u64,
    pub students_detached: u64,
    pub students_reset: Vec<IdentityId>,
    pub requests_removed: u64,
}

/// Result of a deactivation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeactivationSummary {
    pub deactivated: Vec<Identity>,
}

impl DeactivationSummary {
    #[must_use]
    pub fn count(&self) -> usize {
        self.deactivated.len()
    }
}

/// Load an identity or fail with [`CascadeError::IdentityNotFound`].
pub async fn require_identity(
    tx: &mut dyn StoreTransaction,
    id: IdentityId,
) -> CascadeResult<Identity> {
    tx.find_identity(id)
        .await?
        .ok_or(CascadeError::IdentityNotFound { id })
}

/// Load the PI profile of an active PI or fail with [`CascadeError::NotAPi`].
pub async fn require_active_pi(
    tx: &mut dyn StoreTransaction,
    id: IdentityId,
) -> CascadeResult<PiProfile> {
    let identity = tx.find_identity(id).await?;
    if !identity.is_some_and(|i| i.is_active && i.role == IdentityRole::Pi) {
        return Err(CascadeError::NotAPi { id });
    }
    tx.find_pi_profile(id)
        .await?
        .ok_or(CascadeError::NotAPi { id })
}

/// Give `id` a role and create its profile.
///
/// Assigning the role already held returns the existing profile.
pub async fn assign_role_in(
    tx: &mut dyn StoreTransaction,
    id: IdentityId,
    assignment: &RoleAssignment,
) -> CascadeResult<RoleProfile> {
    assignment.validate()?;

    let identity = require_identity(tx, id).await?;
    if !identity.is_active {
        return Err(CascadeError::InactiveIdentity { id });
    }

    let requested = assignment.role();
    if identity.role == requested {
        let existing = match requested {
            IdentityRole::Pi => tx.find_pi_profile(id).await?.map(RoleProfile::Pi),
            IdentityRole::Student => tx.find_student_profile(id).await?.map(RoleProfile::Student),
            IdentityRole::Unassigned => None,
        };
        if let Some(profile) = existing {
            return Ok(profile);
        }
    } else if !identity.role.is_unassigned() {
        return Err(CascadeError::RoleConflict {
            id,
            current: identity.role,
            requested,
        });
    }

    let profile = match assignment {
        RoleAssignment::Pi(input) => RoleProfile::Pi(
            tx.insert_pi_profile(&NewPiProfile {
                identity_id: id.into_uuid(),
                department: input.department.clone(),
                lab_name: input.lab_name.clone(),
            })
            .await?,
        ),
        RoleAssignment::Student(input) => {
            let pi_profile_id = match input.pi_identity_id {
                Some(pi) => Some(require_active_pi(tx, pi).await?.id),
                None => None,
            };
            RoleProfile::Student(
                tx.insert_student_profile(&NewStudentProfile {
                    identity_id: id.into_uuid(),
                    pi_profile_id,
                    academic_program: input.academic_program.clone(),
                    enrollment_status: input.enrollment_status.clone(),
                })
                .await?,
            )
        }
    };

    if identity.role != requested {
        tx.set_role(id, requested).await?;
    }

    Ok(profile)
}

/// Remove the role of `id` and its profile. No-op when unassigned.
pub async fn unassign_role_in(
    tx: &mut dyn StoreTransaction,
    id: IdentityId,
    dependents: DependentStudentPolicy,
) -> CascadeResult<UnassignSummary> {
    let identity = require_identity(tx, id).await?;
    let mut summary = UnassignSummary {
        previous_role: identity.role,
        ..UnassignSummary::default()
    };

    match identity.role {
        IdentityRole::Unassigned => return Ok(summary),
        IdentityRole::Student => {
            summary.profile_removed = tx.delete_student_profile(id).await? > 0;
        }
        IdentityRole::Pi => {
            if let Some(pi) = tx.find_pi_profile(id).await? {
                let (detached, reset) = release_dependents(tx, &pi, dependents).await?;
                summary.students_detached = detached;
                summary.students_reset = reset;
                summary.profile_removed = tx.delete_pi_profile(id).await? > 0;
            }
        }
    }

    tx.set_role(id, IdentityRole::Unassigned).await?;
    Ok(summary)
}

/// Delete `id` and everything that references it.
///
/// Order: own student profile, dependents of its PI profile, requests, PI
/// profile, identity row.
pub async fn delete_identity_in(
    tx: &mut dyn StoreTransaction,
    id: IdentityId,
    dependents: DependentStudentPolicy,
) -> CascadeResult<DeletionSummary> {
    let identity = require_identity(tx, id).await?;

    let student_profiles_removed = tx.delete_student_profile(id).await?;

    let (students_detached, students_reset) = match tx.find_pi_profile(id).await? {
        Some(pi) => release_dependents(tx, &pi, dependents).await?,
        None => (0, Vec::new()),
    };

    let requests_removed = tx.delete_requests_for(id).await?;
    let pi_profiles_removed = tx.delete_pi_profile(id).await?;

    if tx.delete_identity_row(id).await? == 0 {
        return Err(CascadeError::IdentityNotFound { id });
    }

    Ok(DeletionSummary {
        identity_id: id,
        external_id: identity.external_id,
        role: identity.role,
        student_profiles_removed,
        pi_profiles_removed,
        students_detached,
        students_reset,
        requests_removed,
    })
}

async fn release_dependents(
    tx: &mut dyn StoreTransaction,
    pi: &PiProfile,
    policy: DependentStudentPolicy,
) -> StoreResult<(u64, Vec<IdentityId>)> {
    match policy {
        DependentStudentPolicy::Detach => {
            let detached = tx.detach_students(pi.profile_id()).await?;
            Ok((detached, Vec::new()))
        }
        DependentStudentPolicy::Remove => {
            let owners = tx.delete_students_of(pi.profile_id()).await?;
            if !owners.is_empty() {
                tx.set_roles(&owners, IdentityRole::Unassigned).await?;
            }
            Ok((0, owners))
        }
    }
}

/// Runs each cascade operation in its own transaction.
#[derive(Clone)]
pub struct CascadeManager {
    store: Arc<dyn IdentityStore>,
    dependents: DependentStudentPolicy,
}

impl CascadeManager {
    pub fn new(store: Arc<dyn IdentityStore>, dependents: DependentStudentPolicy) -> Self {
        Self { store, dependents }
    }

    #[must_use]
    pub fn dependents(&self) -> DependentStudentPolicy {
        self.dependents
    }

    /// Assign a role, creating its profile.
    #[instrument(skip(self, assignment), fields(identity_id = %id, role = %assignment.role()))]
    pub async fn assign_role(
        &self,
        id: IdentityId,
        assignment: RoleAssignment,
    ) -> CascadeResult<RoleProfile> {
        let mut tx = self.store.begin().await?;
        let profile = assign_role_in(tx.as_mut(), id, &assignment).await?;
        tx.commit().await?;

        info!(profile_id = %profile.profile_id(), "Role assigned");
        Ok(profile)
    }

    /// Remove the role and its profile.
    #[instrument(skip(self), fields(identity_id = %id))]
    pub async fn unassign_role(&self, id: IdentityId) -> CascadeResult<UnassignSummary> {
        let mut tx = self.store.begin().await?;
        let summary = unassign_role_in(tx.as_mut(), id, self.dependents).await?;
        tx.commit().await?;

        info!(
            previous_role = %summary.previous_role,
            students_detached = summary.students_detached,
            students_reset = summary.students_reset.len(),
            "Role unassigned"
        );
        Ok(summary)
    }

    /// Delete an identity with its profiles and requests.
    #[instrument(skip(self), fields(identity_id = %id))]
    pub async fn delete_identity(&self, id: IdentityId) -> CascadeResult<DeletionSummary> {
        let mut tx = self.store.begin().await?;
        let summary = delete_identity_in(tx.as_mut(), id, self.dependents).await?;
        tx.commit().await?;

        info!(
            external_id = %summary.external_id,
            role = %summary.role,
            requests_removed = summary.requests_removed,
            "Identity deleted"
        );
        Ok(summary)
    }

    /// Deactivate every active identity whose external id is not current.
    ///
    /// One transaction for the whole batch. Role profiles are kept.
    #[instrument(skip(self, current_external_ids), fields(current = current_external_ids.len()))]
    pub async fn deactivate_missing(
        &self,
        current_external_ids: &HashSet<String>,
    ) -> CascadeResult<DeactivationSummary> {
        let mut seen: Vec<String> = current_external_ids.iter().cloned().collect();
        seen.sort_unstable();

        let mut tx = self.store.begin().await?;
        let deactivated = tx.deactivate_absent(&seen).await?;
        tx.commit().await?;

        for identity in &deactivated {
            debug!(
                external_id = %identity.external_id,
                role = %identity.role,
                "Deactivated identity missing from snapshot"
            );
        }
        info!(deactivated = deactivated.len(), "Deactivation sweep finished");
        Ok(DeactivationSummary { deactivated })
    }
}
