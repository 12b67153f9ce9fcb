//! Directory snapshot contract.
//!
//! A [`DirectorySource`] hands out the current set of directory records.
//! Records are raw: every attribute is the string the directory returned,
//! and validation happens in the reconciliation engine so that one bad
//! record can be reported without failing the whole snapshot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::DirectoryResult;

/// One principal as seen by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Stable external identifier; the only correlation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Distinguished name of the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinguished_name: Option<String>,
    /// Numeric identity (`uidNumber`), unparsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid_number: Option<String>,
    /// Numeric group (`gidNumber`), unparsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_shell: Option<String>,
    /// Best-effort display name harvested from the directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Best-effort contact email harvested from the directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Best-effort contact phone harvested from the directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Last modification time reported by the directory, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl DirectoryRecord {
    /// Create a record carrying only an external id.
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_distinguished_name(mut self, dn: impl Into<String>) -> Self {
        self.distinguished_name = Some(dn.into());
        self
    }

    #[must_use]
    pub fn with_uid_number(mut self, uid: impl Into<String>) -> Self {
        self.uid_number = Some(uid.into());
        self
    }

    #[must_use]
    pub fn with_gid_number(mut self, gid: impl Into<String>) -> Self {
        self.gid_number = Some(gid.into());
        self
    }

    #[must_use]
    pub fn with_home_path(mut self, home: impl Into<String>) -> Self {
        self.home_path = Some(home.into());
        self
    }

    #[must_use]
    pub fn with_login_shell(mut self, shell: impl Into<String>) -> Self {
        self.login_shell = Some(shell.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    #[must_use]
    pub fn with_modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified_at = Some(at);
        self
    }
}

/// Source of directory snapshots.
///
/// Implementations only read. Nothing in labsync ever writes back to the
/// directory.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Return every record currently in the directory.
    async fn list_all(&self) -> DirectoryResult<Vec<DirectoryRecord>>;

    /// Return records changed at or after `since`.
    ///
    /// The result is partial by nature; the absence of a record says nothing
    /// about whether it still exists.
    async fn list_changed_since(&self, since: DateTime<Utc>)
        -> DirectoryResult<Vec<DirectoryRecord>>;
}

/// A directory held in memory.
///
/// Tests and commands that never fetch a snapshot use it in place of a
/// live directory.
#[derive(Debug, Default)]
pub struct StaticDirectorySource {
    records: RwLock<Vec<DirectoryRecord>>,
}

impl StaticDirectorySource {
    /// Create a source serving the given records.
    pub fn new(records: Vec<DirectoryRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Replace the served records.
    pub async fn replace(&self, records: Vec<DirectoryRecord>) {
        *self.records.write().await = records;
    }

    /// Number of records currently served.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no records are served.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl DirectorySource for StaticDirectorySource {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_all(&self) -> DirectoryResult<Vec<DirectoryRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn list_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> DirectoryResult<Vec<DirectoryRecord>> {
        Ok(changed_since(self.records.read().await.iter().cloned(), since))
    }
}

/// A directory exported as a JSON array of records.
///
/// The file is read on every fetch, so each run sees the export as it is
/// when the run starts. A missing or malformed file fails that fetch.
#[derive(Debug, Clone)]
pub struct SnapshotFileSource {
    name: String,
    path: PathBuf,
}

impl SnapshotFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> DirectoryResult<Vec<DirectoryRecord>> {
        let raw = tokio::fs::read(&self.path).await?;
        let records: Vec<DirectoryRecord> = serde_json::from_slice(&raw)?;
        debug!(path = %self.path.display(), records = records.len(), "Read snapshot file");
        Ok(records)
    }
}

#[async_trait]
impl DirectorySource for SnapshotFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_all(&self) -> DirectoryResult<Vec<DirectoryRecord>> {
        self.read().await
    }

    async fn list_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> DirectoryResult<Vec<DirectoryRecord>> {
        Ok(changed_since(self.read().await?, since))
    }
}

/// Records modified at or after `since`. Records without a timestamp cannot
/// be ruled out, so they are kept.
fn changed_since(
    records: impl IntoIterator<Item = DirectoryRecord>,
    since: DateTime<Utc>,
) -> Vec<DirectoryRecord> {
    records
        .into_iter()
        .filter(|r| r.modified_at.map_or(true, |at| at >= since))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::io::{Seek, Write};

    #[tokio::test]
    async fn test_list_changed_since_filters_by_timestamp() {
        let now = Utc::now();
        let source = StaticDirectorySource::new(vec![
            DirectoryRecord::new("old").with_modified_at(now - Duration::days(2)),
            DirectoryRecord::new("new").with_modified_at(now),
            DirectoryRecord::new("unknown"),
        ]);

        let changed = source
            .list_changed_since(now - Duration::days(1))
            .await
            .unwrap();
        let ids: Vec<_> = changed
            .iter()
            .filter_map(|r| r.external_id.as_deref())
            .collect();

        assert_eq!(ids, vec!["new", "unknown"]);
        assert_eq!(source.list_all().await.unwrap().len(), 3);
    }

    fn write_snapshot(file: &mut tempfile::NamedTempFile, json: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        f.rewind().unwrap();
        f.write_all(json.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_file_parses_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_snapshot(
            &mut file,
            r#"[{"external_id":"u1","home_path":"/home/u1","uid_number":"1001"},{"home_path":"/home/x"}]"#,
        );

        let source = SnapshotFileSource::new(file.path());
        let records = source.list_all().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].external_id.as_deref(), Some("u1"));
        assert_eq!(records[0].uid_number.as_deref(), Some("1001"));
        assert!(records[1].external_id.is_none());
        assert!(source.name().starts_with("file:"));
    }

    #[tokio::test]
    async fn test_snapshot_file_is_reread_on_each_fetch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_snapshot(&mut file, r#"[{"external_id":"u1"},{"external_id":"u2"}]"#);
        let source = SnapshotFileSource::new(file.path());
        assert_eq!(source.list_all().await.unwrap().len(), 2);

        write_snapshot(&mut file, r#"[{"external_id":"u1"}]"#);
        let records = source.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_snapshot_file_errors_surface_on_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SnapshotFileSource::new(dir.path().join("people.json"));
        assert!(matches!(
            missing.list_all().await.unwrap_err(),
            crate::DirectoryError::Io(_)
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_snapshot(&mut file, "not json");
        let garbage = SnapshotFileSource::new(file.path());
        assert!(matches!(
            garbage.list_changed_since(Utc::now()).await.unwrap_err(),
            crate::DirectoryError::Parse(_)
        ));
    }

    #[tokio::test]
    async fn test_replace() {
        let source = StaticDirectorySource::new(vec![DirectoryRecord::new("a")]);
        source
            .replace(vec![DirectoryRecord::new("b"), DirectoryRecord::new("c")])
            .await;
        assert_eq!(source.len().await, 2);
        assert!(!source.is_empty().await);
    }
}
