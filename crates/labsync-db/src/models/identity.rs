//! Identity entity model.
//!
//! One row per directory principal, correlated across runs by `external_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, Postgres, QueryBuilder};
use std::fmt;
use uuid::Uuid;

use labsync_core::IdentityId;

/// Role classification of an identity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdentityRole {
    /// No role assigned yet. This is the sentinel default.
    #[default]
    Unassigned,
    /// Principal investigator.
    Pi,
    /// Student.
    Student,
}

impl IdentityRole {
    /// Whether this is the unassigned sentinel.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        *self == Self::Unassigned
    }
}

impl fmt::Display for IdentityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unassigned => write!(f, "unassigned"),
            Self::Pi => write!(f, "pi"),
            Self::Student => write!(f, "student"),
        }
    }
}

impl std::str::FromStr for IdentityRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unassigned" => Ok(Self::Unassigned),
            "pi" => Ok(Self::Pi),
            "student" => Ok(Self::Student),
            _ => Err(format!("Unknown identity role: {s}")),
        }
    }
}

/// A local identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub id: Uuid,

    /// Stable directory identifier (unique, immutable).
    pub external_id: String,

    // Directory-owned attributes
    pub distinguished_name: Option<String>,
    pub uid_number: Option<i64>,
    pub gid_number: Option<i64>,
    pub home_path: Option<String>,
    pub login_shell: Option<String>,

    // Locally-owned attributes
    pub role: IdentityRole,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,

    /// False once the identity disappeared from a full snapshot.
    pub is_active: bool,
    pub present_in_last_snapshot: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an identity from a directory record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewIdentity {
    pub external_id: String,
    pub distinguished_name: Option<String>,
    pub uid_number: Option<i64>,
    pub gid_number: Option<i64>,
    pub home_path: Option<String>,
    pub login_shell: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl NewIdentity {
    /// Materialize the row this input produces, for stores that do not
    /// generate it in SQL.
    #[must_use]
    pub fn into_identity(self, id: Uuid, now: DateTime<Utc>) -> Identity {
        Identity {
            id,
            external_id: self.external_id,
            distinguished_name: self.distinguished_name,
            uid_number: self.uid_number,
            gid_number: self.gid_number,
            home_path: self.home_path,
            login_shell: self.login_shell,
            role: IdentityRole::Unassigned,
            display_name: self.display_name,
            email: self.email,
            phone: self.phone,
            is_active: true,
            present_in_last_snapshot: true,
            last_synced_at: self.synced_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Column values to overwrite on an existing identity.
///
/// `Some` means "set to this value"; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityPatch {
    pub distinguished_name: Option<String>,
    pub uid_number: Option<i64>,
    pub gid_number: Option<i64>,
    pub home_path: Option<String>,
    pub login_shell: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl IdentityPatch {
    /// Whether the patch changes no column.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Identity {
    /// Get the identity ID as a typed `IdentityId`.
    #[must_use]
    pub fn identity_id(&self) -> IdentityId {
        IdentityId::from_uuid(self.id)
    }

    /// Apply a patch in memory and stamp the row as seen in a snapshot.
    ///
    /// Mirrors [`Identity::apply_directory_write`].
    pub fn apply_patch(&mut self, patch: &IdentityPatch, synced_at: DateTime<Utc>) {
        if let Some(v) = &patch.distinguished_name {
            self.distinguished_name = Some(v.clone());
        }
        if let Some(v) = patch.uid_number {
            self.uid_number = Some(v);
        }
        if let Some(v) = patch.gid_number {
            self.gid_number = Some(v);
        }
        if let Some(v) = &patch.home_path {
            self.home_path = Some(v.clone());
        }
        if let Some(v) = &patch.login_shell {
            self.login_shell = Some(v.clone());
        }
        if let Some(v) = &patch.display_name {
            self.display_name = Some(v.clone());
        }
        if let Some(v) = &patch.email {
            self.email = Some(v.clone());
        }
        if let Some(v) = &patch.phone {
            self.phone = Some(v.clone());
        }
        self.is_active = true;
        self.present_in_last_snapshot = true;
        self.last_synced_at = Some(synced_at);
        self.updated_at = synced_at;
    }

    /// Find and row-lock an identity by ID.
    pub async fn find_by_id_for_update<'e, E>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM identities WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find an identity by its external id.
    pub async fn find_by_external_id<'e, E>(
        executor: E,
        external_id: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM identities WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(executor)
            .await
    }

    /// Find and row-lock an identity by its external id.
    pub async fn find_by_external_id_for_update<'e, E>(
        executor: E,
        external_id: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM identities WHERE external_id = $1 FOR UPDATE")
            .bind(external_id)
            .fetch_optional(executor)
            .await
    }

    /// Create an identity with role `unassigned`.
    pub async fn insert<'e, E>(executor: E, input: &NewIdentity) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            INSERT INTO identities (
                external_id, distinguished_name, uid_number, gid_number, home_path,
                login_shell, role, display_name, email, phone, is_active,
                present_in_last_snapshot, last_synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'unassigned', $7, $8, $9, TRUE, TRUE, $10)
            RETURNING *
            ",
        )
        .bind(&input.external_id)
        .bind(&input.distinguished_name)
        .bind(input.uid_number)
        .bind(input.gid_number)
        .bind(&input.home_path)
        .bind(&input.login_shell)
        .bind(&input.display_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(input.synced_at)
        .fetch_one(executor)
        .await
    }

    /// Apply a directory write as one UPDATE statement.
    ///
    /// Writes the patched columns, marks the identity active and present,
    /// and stamps `last_synced_at`.
    pub async fn apply_directory_write<'e, E>(
        executor: E,
        id: Uuid,
        patch: &IdentityPatch,
        synced_at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE identities SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(v) = &patch.distinguished_name {
                set.push("distinguished_name = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = patch.uid_number {
                set.push("uid_number = ").push_bind_unseparated(v);
            }
            if let Some(v) = patch.gid_number {
                set.push("gid_number = ").push_bind_unseparated(v);
            }
            if let Some(v) = &patch.home_path {
                set.push("home_path = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.login_shell {
                set.push("login_shell = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.display_name {
                set.push("display_name = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.email {
                set.push("email = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = &patch.phone {
                set.push("phone = ").push_bind_unseparated(v.clone());
            }
            set.push("is_active = TRUE");
            set.push("present_in_last_snapshot = TRUE");
            set.push("last_synced_at = ").push_bind_unseparated(synced_at);
            set.push("updated_at = NOW()");
        }
        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        qb.build_query_as::<Self>().fetch_optional(executor).await
    }

    /// Deactivate every active identity whose external id is not in `seen`.
    ///
    /// Returns the deactivated rows.
    pub async fn deactivate_absent<'e, E>(
        executor: E,
        seen: &[String],
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE identities
            SET is_active = FALSE,
                present_in_last_snapshot = FALSE,
                updated_at = NOW()
            WHERE is_active = TRUE
              AND NOT (external_id = ANY($1))
            RETURNING *
            ",
        )
        .bind(seen)
        .fetch_all(executor)
        .await
    }

    /// Set the role classification.
    pub async fn set_role<'e, E>(
        executor: E,
        id: Uuid,
        role: IdentityRole,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE identities SET role = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id)
        .bind(role)
        .fetch_optional(executor)
        .await
    }

    /// Set the role of several identities at once.
    pub async fn set_role_many<'e, E>(
        executor: E,
        ids: &[Uuid],
        role: IdentityRole,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE identities SET role = $2, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(role)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the identity row. Profiles and requests must be gone first.
    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
