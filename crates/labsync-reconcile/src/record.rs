//! Directory record validation.
//!
//! Raw records carry strings straight from the directory. Validation trims
//! them, drops empty values, parses the numeric identifiers and rejects a
//! second record for an external id already seen in the same snapshot.

use std::collections::HashSet;

use labsync_core::DirectoryRecord;

use crate::error::RecordError;

/// A directory record that is safe to reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedRecord {
    pub external_id: String,
    pub distinguished_name: Option<String>,
    pub uid_number: Option<i64>,
    pub gid_number: Option<i64>,
    pub home_path: Option<String>,
    pub login_shell: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Validates the records of one snapshot, in feed order.
#[derive(Debug, Default)]
pub struct RecordValidator {
    seen: HashSet<String>,
}

impl RecordValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate one record.
    ///
    /// A record whose numbers fail to parse still marks its external id as
    /// seen, so a later sweep does not deactivate the identity because of
    /// bad data.
    pub fn validate(&mut self, raw: &DirectoryRecord) -> Result<ValidatedRecord, RecordError> {
        let Some(external_id) = clean(raw.external_id.as_deref()) else {
            return Err(RecordError::MissingExternalId {
                distinguished_name: clean(raw.distinguished_name.as_deref()),
            });
        };

        if !self.seen.insert(external_id.clone()) {
            return Err(RecordError::DuplicateExternalId { external_id });
        }

        let uid_number = parse_number(&external_id, "uid_number", raw.uid_number.as_deref())?;
        let gid_number = parse_number(&external_id, "gid_number", raw.gid_number.as_deref())?;

        Ok(ValidatedRecord {
            distinguished_name: clean(raw.distinguished_name.as_deref()),
            uid_number,
            gid_number,
            home_path: clean(raw.home_path.as_deref()),
            login_shell: clean(raw.login_shell.as_deref()),
            display_name: clean(raw.display_name.as_deref()),
            email: clean(raw.email.as_deref()),
            phone: clean(raw.phone.as_deref()),
            external_id,
        })
    }

    /// External ids seen so far, including those of rejected records.
    #[must_use]
    pub fn seen(&self) -> &HashSet<String> {
        &self.seen
    }

    #[must_use]
    pub fn into_seen(self) -> HashSet<String> {
        self.seen
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn parse_number(
    external_id: &str,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<i64>, RecordError> {
    let Some(raw) = clean(value) else {
        return Ok(None);
    };
    match raw.parse::<i64>() {
        Ok(n) if n >= 0 => Ok(Some(n)),
        _ => Err(RecordError::InvalidNumber {
            external_id: external_id.to_string(),
            field,
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_trims_and_parses() {
        let mut validator = RecordValidator::new();
        let raw = DirectoryRecord::new(" u1 ")
            .with_uid_number("1001")
            .with_gid_number(" 100 ")
            .with_home_path("/home/u1")
            .with_phone("");

        let record = validator.validate(&raw).unwrap();
        assert_eq!(record.external_id, "u1");
        assert_eq!(record.uid_number, Some(1001));
        assert_eq!(record.gid_number, Some(100));
        assert_eq!(record.home_path.as_deref(), Some("/home/u1"));
        assert!(record.phone.is_none());
    }

    #[test]
    fn test_missing_external_id() {
        let mut validator = RecordValidator::new();
        let raw = DirectoryRecord {
            external_id: Some("  ".to_string()),
            distinguished_name: Some("uid=,ou=people,dc=example,dc=edu".to_string()),
            ..DirectoryRecord::default()
        };

        let err = validator.validate(&raw).unwrap_err();
        assert!(matches!(err, RecordError::MissingExternalId { distinguished_name: Some(_) }));
        assert!(validator.seen().is_empty());
    }

    #[test]
    fn test_invalid_numbers_are_rejected_but_seen() {
        let mut validator = RecordValidator::new();

        let err = validator
            .validate(&DirectoryRecord::new("u1").with_uid_number("abc"))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_number");

        let err = validator
            .validate(&DirectoryRecord::new("u2").with_gid_number("-5"))
            .unwrap_err();
        assert!(matches!(err, RecordError::InvalidNumber { field: "gid_number", .. }));

        assert!(validator.seen().contains("u1"));
        assert!(validator.seen().contains("u2"));
    }

    #[test]
    fn test_duplicate_external_id_first_wins() {
        let mut validator = RecordValidator::new();
        let first = validator
            .validate(&DirectoryRecord::new("u1").with_home_path("/home/a"))
            .unwrap();
        assert_eq!(first.home_path.as_deref(), Some("/home/a"));

        let err = validator
            .validate(&DirectoryRecord::new("u1").with_home_path("/home/b"))
            .unwrap_err();
        assert_eq!(
            err,
            RecordError::DuplicateExternalId {
                external_id: "u1".to_string()
            }
        );
        assert_eq!(validator.into_seen().len(), 1);
    }
}
