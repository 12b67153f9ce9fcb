//! Field ownership policy.
//!
//! Every synchronized attribute is either directory-owned (the directory is
//! authoritative and always wins) or locally-owned (a locally set value is
//! never overwritten by a sync pass). The classification is a total match
//! over [`SyncField`]; adding a field without classifying it does not
//! compile.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who is authoritative for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOwnership {
    DirectoryOwned,
    LocallyOwned,
}

/// Every attribute the reconciliation engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncField {
    ExternalId,
    DistinguishedName,
    UidNumber,
    GidNumber,
    HomePath,
    LoginShell,
    DisplayName,
    Email,
    Phone,
    Role,
    Department,
    LabName,
    AcademicProgram,
    EnrollmentStatus,
}

impl SyncField {
    /// All fields, in a stable order.
    pub const ALL: [SyncField; 14] = [
        Self::ExternalId,
        Self::DistinguishedName,
        Self::UidNumber,
        Self::GidNumber,
        Self::HomePath,
        Self::LoginShell,
        Self::DisplayName,
        Self::Email,
        Self::Phone,
        Self::Role,
        Self::Department,
        Self::LabName,
        Self::AcademicProgram,
        Self::EnrollmentStatus,
    ];

    /// Ownership classification. Fixed at compile time.
    #[must_use]
    pub const fn ownership(self) -> FieldOwnership {
        match self {
            Self::ExternalId
            | Self::DistinguishedName
            | Self::UidNumber
            | Self::GidNumber
            | Self::HomePath
            | Self::LoginShell => FieldOwnership::DirectoryOwned,
            Self::DisplayName
            | Self::Email
            | Self::Phone
            | Self::Role
            | Self::Department
            | Self::LabName
            | Self::AcademicProgram
            | Self::EnrollmentStatus => FieldOwnership::LocallyOwned,
        }
    }

    #[must_use]
    pub const fn is_directory_owned(self) -> bool {
        matches!(self.ownership(), FieldOwnership::DirectoryOwned)
    }

    #[must_use]
    pub const fn is_locally_owned(self) -> bool {
        matches!(self.ownership(), FieldOwnership::LocallyOwned)
    }

    /// Column-style name used in logs and diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExternalId => "external_id",
            Self::DistinguishedName => "distinguished_name",
            Self::UidNumber => "uid_number",
            Self::GidNumber => "gid_number",
            Self::HomePath => "home_path",
            Self::LoginShell => "login_shell",
            Self::DisplayName => "display_name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Role => "role",
            Self::Department => "department",
            Self::LabName => "lab_name",
            Self::AcademicProgram => "academic_program",
            Self::EnrollmentStatus => "enrollment_status",
        }
    }

    /// Iterate the fields with the given ownership.
    pub fn owned_by(ownership: FieldOwnership) -> impl Iterator<Item = SyncField> {
        Self::ALL
            .into_iter()
            .filter(move |f| f.ownership() == ownership)
    }
}

impl fmt::Display for SyncField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime knobs of the ownership policy.
///
/// The field table itself is not configurable; only how system-written
/// placeholder emails are recognized and whether new identities get one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipPolicy {
    /// Email domains the system writes as stand-ins. A value in one of
    /// these domains (or a subdomain) does not count as locally set.
    #[serde(default)]
    pub placeholder_email_domains: Vec<String>,

    /// Seed `<external_id>@<first placeholder domain>` on new identities
    /// whose directory record has no email.
    #[serde(default)]
    pub seed_placeholder_email: bool,
}

impl OwnershipPolicy {
    /// Create a policy recognizing the given placeholder domains.
    pub fn new<I, S>(placeholder_email_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            placeholder_email_domains: placeholder_email_domains
                .into_iter()
                .filter_map(|d| normalize_domain(d.as_ref()))
                .collect(),
            seed_placeholder_email: false,
        }
    }

    #[must_use]
    pub fn with_seeding(mut self, enabled: bool) -> Self {
        self.seed_placeholder_email = enabled;
        self
    }

    /// Whether `email` is a system-written placeholder.
    #[must_use]
    pub fn is_placeholder_email(&self, email: &str) -> bool {
        let Some((_, domain)) = email.trim().rsplit_once('@') else {
            return false;
        };
        let domain = domain.to_ascii_lowercase();
        self.placeholder_email_domains.iter().filter_map(|d| normalize_domain(d)).any(|d| {
            domain == d
                || domain
                    .strip_suffix(d.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Placeholder email to seed for a new identity, when seeding is on.
    #[must_use]
    pub fn placeholder_email_for(&self, external_id: &str) -> Option<String> {
        if !self.seed_placeholder_email {
            return None;
        }
        let domain = self
            .placeholder_email_domains
            .iter()
            .find_map(|d| normalize_domain(d))?;
        Some(format!("{external_id}@{domain}"))
    }
}

fn normalize_domain(raw: &str) -> Option<String> {
    let d = raw.trim().trim_start_matches('@').to_ascii_lowercase();
    (!d.is_empty()).then_some(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_field_is_classified() {
        let directory: Vec<_> = SyncField::owned_by(FieldOwnership::DirectoryOwned).collect();
        let local: Vec<_> = SyncField::owned_by(FieldOwnership::LocallyOwned).collect();

        assert_eq!(directory.len() + local.len(), SyncField::ALL.len());
        assert!(directory.contains(&SyncField::HomePath));
        assert!(directory.contains(&SyncField::GidNumber));
        assert!(local.contains(&SyncField::Email));
        assert!(local.contains(&SyncField::Role));
        assert!(local.contains(&SyncField::EnrollmentStatus));
    }

    #[test]
    fn test_placeholder_domain_matching() {
        let policy = OwnershipPolicy::new(["ldap-system.local", "@Placeholder.Example"]);

        assert!(policy.is_placeholder_email("u1@ldap-system.local"));
        assert!(policy.is_placeholder_email("U1@LDAP-SYSTEM.LOCAL "));
        assert!(policy.is_placeholder_email("u1@mail.ldap-system.local"));
        assert!(policy.is_placeholder_email("u1@placeholder.example"));
        assert!(!policy.is_placeholder_email("alice@dept.edu"));
        assert!(!policy.is_placeholder_email("alice@notldap-system.local"));
        assert!(!policy.is_placeholder_email("not-an-email"));
    }

    #[test]
    fn test_empty_policy_has_no_placeholders() {
        let policy = OwnershipPolicy::default();
        assert!(!policy.is_placeholder_email("u1@ldap-system.local"));
        assert!(policy.placeholder_email_for("u1").is_none());
    }

    #[test]
    fn test_placeholder_seeding() {
        let policy = OwnershipPolicy::new(["ldap-system.local"]);
        assert!(policy.placeholder_email_for("u1").is_none());

        let seeding = policy.with_seeding(true);
        let seeded = seeding.placeholder_email_for("u1").unwrap();
        assert_eq!(seeded, "u1@ldap-system.local");
        assert!(seeding.is_placeholder_email(&seeded));
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: OwnershipPolicy = serde_json::from_str("{}").unwrap();
        assert!(policy.placeholder_email_domains.is_empty());
        assert!(!policy.seed_placeholder_email);
    }
}
