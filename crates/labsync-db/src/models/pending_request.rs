//! Pending student create/delete requests.
//!
//! A PI proposes adding or removing a student; an administrator approves or
//! rejects. Requests reference identities, so the cascade on identity
//! deletion clears them before the identity row goes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::fmt;
use uuid::Uuid;

use labsync_core::{IdentityId, RequestId};

/// What the request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Give the target the student role under the requesting PI.
    CreateStudent,
    /// Remove the student role from the target.
    DeleteStudent,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateStudent => write!(f, "create_student"),
            Self::DeleteStudent => write!(f, "delete_student"),
        }
    }
}

impl std::str::FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create_student" => Ok(Self::CreateStudent),
            "delete_student" => Ok(Self::DeleteStudent),
            _ => Err(format!("Unknown request kind: {s}")),
        }
    }
}

/// Request lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

impl RequestStatus {
    /// Whether the request has been resolved.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only pending requests move, and only to a terminal state.
    #[must_use]
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(self, Self::Pending) && next.is_terminal()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Withdrawn => write!(f, "withdrawn"),
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "withdrawn" => Ok(Self::Withdrawn),
            _ => Err(format!("Unknown request status: {s}")),
        }
    }
}

/// A student create/delete request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PendingRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub status: RequestStatus,
    /// PI identity that raised the request.
    pub requested_by: Uuid,
    pub target_identity_id: Uuid,
    pub academic_program: Option<String>,
    pub enrollment_status: Option<String>,
    pub note: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Input for raising a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPendingRequest {
    pub kind: RequestKind,
    pub requested_by: Uuid,
    pub target_identity_id: Uuid,
    pub academic_program: Option<String>,
    pub enrollment_status: Option<String>,
    pub note: Option<String>,
}

impl NewPendingRequest {
    #[must_use]
    pub fn into_request(self, id: Uuid, now: DateTime<Utc>) -> PendingRequest {
        PendingRequest {
            id,
            kind: self.kind,
            status: RequestStatus::Pending,
            requested_by: self.requested_by,
            target_identity_id: self.target_identity_id,
            academic_program: self.academic_program,
            enrollment_status: self.enrollment_status,
            note: self.note,
            resolved_by: None,
            resolution_note: None,
            created_at: now,
            resolved_at: None,
        }
    }
}

/// Resolution written when a request leaves `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResolution {
    pub status: RequestStatus,
    pub resolved_by: Option<Uuid>,
    pub note: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

impl PendingRequest {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        RequestId::from_uuid(self.id)
    }

    #[must_use]
    pub fn target(&self) -> IdentityId {
        IdentityId::from_uuid(self.target_identity_id)
    }

    #[must_use]
    pub fn requester(&self) -> IdentityId {
        IdentityId::from_uuid(self.requested_by)
    }

    /// Whether the request references the identity on either side.
    #[must_use]
    pub fn references(&self, identity_id: Uuid) -> bool {
        self.requested_by == identity_id || self.target_identity_id == identity_id
    }

    /// Apply a resolution in memory.
    pub fn resolve(&mut self, resolution: &RequestResolution) {
        self.status = resolution.status;
        self.resolved_by = resolution.resolved_by;
        self.resolution_note.clone_from(&resolution.note);
        self.resolved_at = Some(resolution.resolved_at);
    }

    /// Find and row-lock a request by ID.
    pub async fn find_by_id_for_update<'e, E>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM pending_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find the open request targeting an identity, if any.
    pub async fn find_pending_for_target<'e, E>(
        executor: E,
        target_identity_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            "SELECT * FROM pending_requests WHERE target_identity_id = $1 AND status = 'pending'",
        )
        .bind(target_identity_id)
        .fetch_optional(executor)
        .await
    }

    /// List requests, newest first, optionally only open ones.
    pub async fn list<'e, E>(
        executor: E,
        pending_only: bool,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT * FROM pending_requests
            WHERE ($1 = FALSE OR status = 'pending')
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(pending_only)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    pub async fn insert<'e, E>(executor: E, input: &NewPendingRequest) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            INSERT INTO pending_requests (
                kind, status, requested_by, target_identity_id,
                academic_program, enrollment_status, note
            )
            VALUES ($1, 'pending', $2, $3, $4, $5, $6)
            RETURNING *
            ",
        )
        .bind(input.kind)
        .bind(input.requested_by)
        .bind(input.target_identity_id)
        .bind(&input.academic_program)
        .bind(&input.enrollment_status)
        .bind(&input.note)
        .fetch_one(executor)
        .await
    }

    /// Move a pending request to a terminal state.
    ///
    /// Returns `None` when the request is missing or already resolved.
    pub async fn resolve_pending<'e, E>(
        executor: E,
        id: Uuid,
        resolution: &RequestResolution,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE pending_requests
            SET status = $2, resolved_by = $3, resolution_note = $4, resolved_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            ",
        )
        .bind(id)
        .bind(resolution.status)
        .bind(resolution.resolved_by)
        .bind(&resolution.note)
        .bind(resolution.resolved_at)
        .fetch_optional(executor)
        .await
    }

    /// Delete every request authored by or targeting an identity.
    pub async fn delete_for_identity<'e, E>(
        executor: E,
        identity_id: Uuid,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "DELETE FROM pending_requests WHERE requested_by = $1 OR target_identity_id = $1",
        )
        .bind(identity_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Approved));
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Withdrawn));
        assert!(!RequestStatus::Pending.can_transition_to(RequestStatus::Pending));
        assert!(!RequestStatus::Approved.can_transition_to(RequestStatus::Rejected));
        assert!(!RequestStatus::Rejected.can_transition_to(RequestStatus::Approved));
    }

    #[test]
    fn test_kind_round_trips_through_strings() {
        assert_eq!(
            "create_student".parse::<RequestKind>().unwrap(),
            RequestKind::CreateStudent
        );
        assert_eq!(RequestKind::DeleteStudent.to_string(), "delete_student");
        assert!("promote".parse::<RequestKind>().is_err());
    }

    #[test]
    fn test_resolve_and_references() {
        let pi = Uuid::new_v4();
        let student = Uuid::new_v4();
        let mut request = NewPendingRequest {
            kind: RequestKind::CreateStudent,
            requested_by: pi,
            target_identity_id: student,
            academic_program: None,
            enrollment_status: None,
            note: Some("joining in fall".to_string()),
        }
        .into_request(Uuid::new_v4(), Utc::now());

        assert!(request.references(pi));
        assert!(request.references(student));
        assert!(!request.references(Uuid::new_v4()));

        let now = Utc::now();
        request.resolve(&RequestResolution {
            status: RequestStatus::Rejected,
            resolved_by: None,
            note: Some("duplicate".to_string()),
            resolved_at: now,
        });
        assert_eq!(request.status, RequestStatus::Rejected);
        assert_eq!(request.resolution_note.as_deref(), Some("duplicate"));
        assert_eq!(request.resolved_at, Some(now));
    }
}
