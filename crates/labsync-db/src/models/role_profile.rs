//! PI and student role profiles.
//!
//! A profile row exists only while its identity holds the matching role.
//! Every column here is locally owned; directory syncs never touch them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;

use labsync_core::{IdentityId, ProfileId};

/// Principal investigator profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PiProfile {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub department: Option<String>,
    pub lab_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a PI profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPiProfile {
    pub identity_id: Uuid,
    pub department: Option<String>,
    pub lab_name: Option<String>,
}

impl NewPiProfile {
    #[must_use]
    pub fn into_profile(self, id: Uuid, now: DateTime<Utc>) -> PiProfile {
        PiProfile {
            id,
            identity_id: self.identity_id,
            department: self.department,
            lab_name: self.lab_name,
            created_at: now,
            updated_at: now,
        }
    }
}

impl PiProfile {
    #[must_use]
    pub fn profile_id(&self) -> ProfileId {
        ProfileId::from_uuid(self.id)
    }

    #[must_use]
    pub fn owner(&self) -> IdentityId {
        IdentityId::from_uuid(self.identity_id)
    }

    /// Find the PI profile owned by an identity.
    pub async fn find_by_identity<'e, E>(
        executor: E,
        identity_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM pi_profiles WHERE identity_id = $1 FOR UPDATE")
            .bind(identity_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn insert<'e, E>(executor: E, input: &NewPiProfile) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            INSERT INTO pi_profiles (identity_id, department, lab_name)
            VALUES ($1, $2, $3)
            RETURNING *
            ",
        )
        .bind(input.identity_id)
        .bind(&input.department)
        .bind(&input.lab_name)
        .fetch_one(executor)
        .await
    }

    pub async fn delete_by_identity<'e, E>(executor: E, identity_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM pi_profiles WHERE identity_id = $1")
            .bind(identity_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Student profile, optionally attached to a PI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StudentProfile {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub pi_profile_id: Option<Uuid>,
    pub academic_program: Option<String>,
    pub enrollment_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a student profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewStudentProfile {
    pub identity_id: Uuid,
    pub pi_profile_id: Option<Uuid>,
    pub academic_program: Option<String>,
    pub enrollment_status: Option<String>,
}

impl NewStudentProfile {
    #[must_use]
    pub fn into_profile(self, id: Uuid, now: DateTime<Utc>) -> StudentProfile {
        StudentProfile {
            id,
            identity_id: self.identity_id,
            pi_profile_id: self.pi_profile_id,
            academic_program: self.academic_program,
            enrollment_status: self.enrollment_status,
            created_at: now,
            updated_at: now,
        }
    }
}

impl StudentProfile {
    #[must_use]
    pub fn profile_id(&self) -> ProfileId {
        ProfileId::from_uuid(self.id)
    }

    #[must_use]
    pub fn owner(&self) -> IdentityId {
        IdentityId::from_uuid(self.identity_id)
    }

    /// Find the student profile owned by an identity.
    pub async fn find_by_identity<'e, E>(
        executor: E,
        identity_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM student_profiles WHERE identity_id = $1 FOR UPDATE")
            .bind(identity_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn insert<'e, E>(executor: E, input: &NewStudentProfile) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            INSERT INTO student_profiles (identity_id, pi_profile_id, academic_program, enrollment_status)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(input.identity_id)
        .bind(input.pi_profile_id)
        .bind(&input.academic_program)
        .bind(&input.enrollment_status)
        .fetch_one(executor)
        .await
    }

    pub async fn delete_by_identity<'e, E>(executor: E, identity_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM student_profiles WHERE identity_id = $1")
            .bind(identity_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every student profile attached to a PI profile.
    ///
    /// Returns the owning identity ids of the deleted rows.
    pub async fn delete_by_pi_profile<'e, E>(
        executor: E,
        pi_profile_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "DELETE FROM student_profiles WHERE pi_profile_id = $1 RETURNING identity_id",
        )
        .bind(pi_profile_id)
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Detach every student profile from a PI profile.
    pub async fn detach_from_pi<'e, E>(executor: E, pi_profile_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r"
            UPDATE student_profiles SET pi_profile_id = NULL, updated_at = NOW()
            WHERE pi_profile_id = $1
            ",
        )
        .bind(pi_profile_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

/// The role profile of one identity, whichever role it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleProfile {
    Pi(PiProfile),
    Student(StudentProfile),
}

impl RoleProfile {
    #[must_use]
    pub fn owner(&self) -> IdentityId {
        match self {
            Self::Pi(p) => p.owner(),
            Self::Student(s) => s.owner(),
        }
    }

    #[must_use]
    pub fn profile_id(&self) -> ProfileId {
        match self {
            Self::Pi(p) => p.profile_id(),
            Self::Student(s) => s.profile_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_profile_owner() {
        let identity_id = Uuid::new_v4();
        let now = Utc::now();
        let student = NewStudentProfile {
            identity_id,
            academic_program: Some("PhD Physics".to_string()),
            ..NewStudentProfile::default()
        }
        .into_profile(Uuid::new_v4(), now);
        let profile = RoleProfile::Student(student.clone());

        assert_eq!(profile.owner(), IdentityId::from_uuid(identity_id));
        assert_eq!(profile.profile_id(), student.profile_id());
        assert!(student.pi_profile_id.is_none());
    }

    #[test]
    fn test_role_profile_serializes_with_role_tag() {
        let pi = NewPiProfile {
            identity_id: Uuid::new_v4(),
            lab_name: Some("Quantum Lab".to_string()),
            ..NewPiProfile::default()
        }
        .into_profile(Uuid::new_v4(), Utc::now());
        let json = serde_json::to_value(RoleProfile::Pi(pi)).unwrap();
        assert_eq!(json["role"], "pi");
        assert_eq!(json["lab_name"], "Quantum Lab");
    }
}
