//! Merge engine.
//!
//! Decides, per field, whether a directory value may be written onto an
//! existing identity. Directory-owned values always win; locally-owned values
//! are written only while the field is unprotected. Values equal to what is
//! already stored are left out, so a converged identity yields an empty
//! write set.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use labsync_db::{Identity, IdentityPatch, NewIdentity};

use crate::detector::ProtectedSet;
use crate::ownership::{OwnershipPolicy, SyncField};
use crate::record::ValidatedRecord;

/// A value destined for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(i64),
}

/// Fields to write on one identity, applied as a single statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet(BTreeMap<SyncField, FieldValue>);

impl WriteSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, field: SyncField) -> Option<&FieldValue> {
        self.0.get(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = SyncField> + '_ {
        self.0.keys().copied()
    }

    fn put(&mut self, field: SyncField, value: FieldValue) {
        self.0.insert(field, value);
    }

    /// Column patch carrying exactly the fields of this set.
    #[must_use]
    pub fn to_patch(&self) -> IdentityPatch {
        let mut patch = IdentityPatch::default();
        for (field, value) in &self.0 {
            match (field, value) {
                (SyncField::DistinguishedName, FieldValue::Text(v)) => {
                    patch.distinguished_name = Some(v.clone());
                }
                (SyncField::UidNumber, FieldValue::Number(n)) => patch.uid_number = Some(*n),
                (SyncField::GidNumber, FieldValue::Number(n)) => patch.gid_number = Some(*n),
                (SyncField::HomePath, FieldValue::Text(v)) => patch.home_path = Some(v.clone()),
                (SyncField::LoginShell, FieldValue::Text(v)) => patch.login_shell = Some(v.clone()),
                (SyncField::DisplayName, FieldValue::Text(v)) => {
                    patch.display_name = Some(v.clone());
                }
                (SyncField::Email, FieldValue::Text(v)) => patch.email = Some(v.clone()),
                (SyncField::Phone, FieldValue::Text(v)) => patch.phone = Some(v.clone()),
                // Not carried by directory records; never put into a set.
                _ => {}
            }
        }
        patch
    }
}

/// Compute the write set for `record` against the current `identity`.
///
/// `protected` must come from [`crate::detector::detect_protected`] on the
/// same, freshly loaded identity.
#[must_use]
pub fn merge(record: &ValidatedRecord, identity: &Identity, protected: &ProtectedSet) -> WriteSet {
    let mut set = WriteSet::default();

    let mut text = |field: SyncField, incoming: &Option<String>, current: &Option<String>| {
        if let Some(value) = incoming {
            if allowed(field, protected) && current.as_ref() != Some(value) {
                set.put(field, FieldValue::Text(value.clone()));
            }
        }
    };
    text(
        SyncField::DistinguishedName,
        &record.distinguished_name,
        &identity.distinguished_name,
    );
    text(SyncField::HomePath, &record.home_path, &identity.home_path);
    text(SyncField::LoginShell, &record.login_shell, &identity.login_shell);
    text(SyncField::DisplayName, &record.display_name, &identity.display_name);
    text(SyncField::Email, &record.email, &identity.email);
    text(SyncField::Phone, &record.phone, &identity.phone);

    for (field, incoming, current) in [
        (SyncField::UidNumber, record.uid_number, identity.uid_number),
        (SyncField::GidNumber, record.gid_number, identity.gid_number),
    ] {
        if let Some(value) = incoming {
            if allowed(field, protected) && current != Some(value) {
                set.put(field, FieldValue::Number(value));
            }
        }
    }

    set
}

fn allowed(field: SyncField, protected: &ProtectedSet) -> bool {
    field.is_directory_owned() || !protected.contains(field)
}

/// Initial row for an external id with no local identity yet.
///
/// Every field is empty locally, so all directory values are taken. With
/// seeding enabled, a missing email gets the policy placeholder.
#[must_use]
pub fn new_identity(
    record: &ValidatedRecord,
    policy: &OwnershipPolicy,
    synced_at: DateTime<Utc>,
) -> NewIdentity {
    NewIdentity {
        external_id: record.external_id.clone(),
        distinguished_name: record.distinguished_name.clone(),
        uid_number: record.uid_number,
        gid_number: record.gid_number,
        home_path: record.home_path.clone(),
        login_shell: record.login_shell.clone(),
        display_name: record.display_name.clone(),
        email: record
            .email
            .clone()
            .or_else(|| policy.placeholder_email_for(&record.external_id)),
        phone: record.phone.clone(),
        synced_at: Some(synced_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::detect_protected;
    use uuid::Uuid;

    fn policy() -> OwnershipPolicy {
        OwnershipPolicy::new(["ldap-system.local"])
    }

    fn record() -> ValidatedRecord {
        ValidatedRecord {
            external_id: "u1".to_string(),
            home_path: Some("/home/u1".to_string()),
            email: Some("alice@ldap-system.local".to_string()),
            phone: Some("555-0100".to_string()),
            ..ValidatedRecord::default()
        }
    }

    fn identity() -> Identity {
        let mut identity = NewIdentity {
            external_id: "u1".to_string(),
            home_path: Some("/old/u1".to_string()),
            ..NewIdentity::default()
        }
        .into_identity(Uuid::new_v4(), Utc::now());
        identity.email = Some("alice@dept.edu".to_string());
        identity.phone = Some(String::new());
        identity
    }

    #[test]
    fn test_protected_email_is_kept_and_phone_is_filled() {
        let identity = identity();
        let protected = detect_protected(&policy(), &identity, None);
        let set = merge(&record(), &identity, &protected);

        assert!(set.get(SyncField::Email).is_none());
        assert_eq!(
            set.get(SyncField::Phone),
            Some(&FieldValue::Text("555-0100".to_string()))
        );
        assert_eq!(
            set.get(SyncField::HomePath),
            Some(&FieldValue::Text("/home/u1".to_string()))
        );

        let patch = set.to_patch();
        assert!(patch.email.is_none());
        assert_eq!(patch.phone.as_deref(), Some("555-0100"));
        assert_eq!(patch.home_path.as_deref(), Some("/home/u1"));
    }

    #[test]
    fn test_directory_owned_ignores_protection() {
        let identity = identity();
        let protected: ProtectedSet = [SyncField::Email, SyncField::Phone].into_iter().collect();
        let set = merge(&record(), &identity, &protected);

        assert_eq!(set.fields().collect::<Vec<_>>(), vec![SyncField::HomePath]);
    }

    #[test]
    fn test_absent_fields_are_untouched() {
        let mut identity = identity();
        identity.login_shell = Some("/bin/zsh".to_string());
        let set = merge(&record(), &identity, &ProtectedSet::new());

        assert!(set.get(SyncField::LoginShell).is_none());
        assert!(set.to_patch().login_shell.is_none());
    }

    #[test]
    fn test_converged_identity_yields_empty_set() {
        let mut identity = identity();
        let protected = detect_protected(&policy(), &identity, None);
        let patch = merge(&record(), &identity, &protected).to_patch();
        identity.apply_patch(&patch, Utc::now());

        let protected = detect_protected(&policy(), &identity, None);
        assert!(merge(&record(), &identity, &protected).is_empty());
    }

    #[test]
    fn test_numbers_are_directory_owned() {
        let mut identity = identity();
        identity.uid_number = Some(1000);
        let record = ValidatedRecord {
            uid_number: Some(1001),
            gid_number: Some(100),
            ..record()
        };
        let set = merge(&record, &identity, &ProtectedSet::new());

        assert_eq!(set.get(SyncField::UidNumber), Some(&FieldValue::Number(1001)));
        assert_eq!(set.to_patch().gid_number, Some(100));
    }

    #[test]
    fn test_new_identity_seeds_placeholder_only_when_missing() {
        let seeding = policy().with_seeding(true);
        let now = Utc::now();

        let without_email = ValidatedRecord {
            email: None,
            ..record()
        };
        let created = new_identity(&without_email, &seeding, now);
        assert_eq!(created.email.as_deref(), Some("u1@ldap-system.local"));
        assert_eq!(created.synced_at, Some(now));

        let created = new_identity(&record(), &seeding, now);
        assert_eq!(created.email.as_deref(), Some("alice@ldap-system.local"));

        let created = new_identity(&without_email, &policy(), now);
        assert!(created.email.is_none());
    }
}
