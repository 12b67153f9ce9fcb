//! Identity lifecycle manager.
//!
//! Moves one identity through `absent -> active`, `active -> active` and
//! `deactivated -> active` for a single validated record. Deactivation is
//! decided only after a whole snapshot has been consumed and lives in
//! [`crate::cascade::CascadeManager::deactivate_missing`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::detector::detect_protected;
use crate::error::StoreResult;
use crate::merge::{merge, new_identity};
use crate::ownership::OwnershipPolicy;
use crate::record::ValidatedRecord;
use crate::store::{role_profile_of, StoreTransaction};

/// What applying one record did to its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// No identity had this external id; one was created.
    Created,
    /// At least one field changed.
    Updated,
    /// Already converged; only the sync stamp moved.
    Unchanged,
    /// The identity was deactivated and is active again.
    Reactivated,
}

impl fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Reactivated => write!(f, "reactivated"),
        }
    }
}

/// Applies directory records to identities.
#[derive(Debug, Clone, Default)]
pub struct LifecycleManager {
    policy: OwnershipPolicy,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(policy: OwnershipPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &OwnershipPolicy {
        &self.policy
    }

    /// Apply one record inside `tx`.
    ///
    /// Protection is recomputed from the row just loaded, so an edit made
    /// between passes is honored.
    pub async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        record: &ValidatedRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<RecordOutcome> {
        let Some(identity) = tx.find_identity_by_external_id(&record.external_id).await? else {
            let created = tx
                .insert_identity(&new_identity(record, &self.policy, now))
                .await?;
            debug!(
                external_id = %record.external_id,
                identity_id = %created.id,
                "Created identity"
            );
            return Ok(RecordOutcome::Created);
        };

        let profile = role_profile_of(tx, &identity).await?;
        let protected = detect_protected(&self.policy, &identity, profile.as_ref());
        let writes = merge(record, &identity, &protected);

        tx.apply_directory_write(identity.identity_id(), &writes.to_patch(), now)
            .await?;

        let outcome = if !identity.is_active {
            RecordOutcome::Reactivated
        } else if writes.is_empty() && identity.present_in_last_snapshot {
            RecordOutcome::Unchanged
        } else {
            RecordOutcome::Updated
        };

        debug!(
            external_id = %record.external_id,
            outcome = %outcome,
            written = ?writes.fields().map(|f| f.as_str()).collect::<Vec<_>>(),
            protected = ?protected.names(),
            "Merged directory record"
        );

        Ok(outcome)
    }
}
