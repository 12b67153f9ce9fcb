//! Local-modification detector.
//!
//! Computes which locally-owned fields currently hold a value that a person
//! or an approved workflow put there. Always called on freshly loaded state;
//! the result is never cached across passes.

use serde::{Serialize, Serializer};
use std::collections::BTreeSet;

use labsync_db::{Identity, RoleProfile};

use crate::ownership::{OwnershipPolicy, SyncField};

/// Locally-owned fields that a sync pass must not overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedSet(BTreeSet<SyncField>);

impl ProtectedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, field: SyncField) -> bool {
        self.0.contains(&field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = SyncField> + '_ {
        self.0.iter().copied()
    }

    /// Field names in stable order, for diagnostics.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(SyncField::as_str).collect()
    }

    fn insert_if(&mut self, field: SyncField, protected: bool) {
        debug_assert!(field.is_locally_owned());
        if protected {
            self.0.insert(field);
        }
    }
}

impl FromIterator<SyncField> for ProtectedSet {
    fn from_iter<T: IntoIterator<Item = SyncField>>(iter: T) -> Self {
        Self(iter.into_iter().filter(|f| f.is_locally_owned()).collect())
    }
}

impl Serialize for ProtectedSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Protected locally-owned fields of `identity` and its role profile.
#[must_use]
pub fn detect_protected(
    policy: &OwnershipPolicy,
    identity: &Identity,
    profile: Option<&RoleProfile>,
) -> ProtectedSet {
    let mut set = ProtectedSet::new();

    set.insert_if(SyncField::DisplayName, has_text(identity.display_name.as_deref()));
    set.insert_if(
        SyncField::Email,
        identity
            .email
            .as_deref()
            .is_some_and(|e| has_text(Some(e)) && !policy.is_placeholder_email(e)),
    );
    set.insert_if(SyncField::Phone, has_text(identity.phone.as_deref()));
    set.insert_if(SyncField::Role, !identity.role.is_unassigned());

    match profile {
        Some(RoleProfile::Pi(pi)) => {
            set.insert_if(SyncField::Department, has_text(pi.department.as_deref()));
            set.insert_if(SyncField::LabName, has_text(pi.lab_name.as_deref()));
        }
        Some(RoleProfile::Student(student)) => {
            set.insert_if(
                SyncField::AcademicProgram,
                has_text(student.academic_program.as_deref()),
            );
            set.insert_if(
                SyncField::EnrollmentStatus,
                has_text(student.enrollment_status.as_deref()),
            );
        }
        None => {}
    }

    set
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}
