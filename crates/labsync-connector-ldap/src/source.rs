//! LDAP directory source
//!
//! Implements [`DirectorySource`] with a bind and one subtree search per
//! snapshot. The source never writes to the directory.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, info, instrument, warn};

use labsync_core::{DirectoryError, DirectoryRecord, DirectoryResult, DirectorySource};

use crate::config::{AttributeMap, LdapConfig};

/// LDAP result code for invalid credentials.
const LDAP_INVALID_CREDENTIALS: u32 = 49;

/// Directory source backed by an LDAP server.
pub struct LdapDirectorySource {
    config: LdapConfig,
    name: String,
}

impl LdapDirectorySource {
    /// Create a source after validating the configuration.
    pub fn new(config: LdapConfig) -> DirectoryResult<Self> {
        config.validate()?;
        let name = format!("ldap:{}", config.host);
        Ok(Self { config, name })
    }

    #[must_use]
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Open and bind a fresh connection.
    async fn connect(&self) -> DirectoryResult<Ldap> {
        let url = self.config.url();
        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.connection_timeout_secs))
            .set_starttls(self.config.use_starttls)
            .set_no_tls_verify(self.config.no_tls_verify);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                DirectoryError::unreachable_with_source(
                    format!("Failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, bind_password)
            .await
            .map_err(|e| {
                DirectoryError::unreachable_with_source(format!("LDAP bind failed for {bind_dn}"), e)
            })?;

        if result.rc != 0 {
            if result.rc == LDAP_INVALID_CREDENTIALS {
                return Err(DirectoryError::AuthenticationFailed);
            }
            return Err(DirectoryError::query_failed(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        Ok(ldap)
    }

    /// Bind, search, unbind.
    async fn fetch(&self, filter: &str) -> DirectoryResult<Vec<DirectoryRecord>> {
        let timeout = Duration::from_secs(self.config.search_timeout_secs);
        let search = async {
            let mut ldap = self.connect().await?;
            let base = self.config.user_dn();
            let attrs = self.config.attributes.requested();

            debug!(filter = %filter, base_dn = %base, "Searching LDAP");

            let result = ldap
                .search(&base, Scope::Subtree, filter, attrs)
                .await
                .map_err(|e| DirectoryError::query_failed(format!("LDAP search failed: {e}")))?;
            let (entries, _) = result
                .success()
                .map_err(|e| DirectoryError::query_failed(format!("LDAP search failed: {e}")))?;

            if let Err(e) = ldap.unbind().await {
                debug!(error = %e, "LDAP unbind failed");
            }

            Ok::<_, DirectoryError>(
                entries
                    .into_iter()
                    .map(SearchEntry::construct)
                    .map(|entry| entry_to_record(&self.config.attributes, entry))
                    .collect::<Vec<_>>(),
            )
        };

        tokio::time::timeout(timeout, search)
            .await
            .map_err(|_| DirectoryError::Timeout {
                seconds: self.config.search_timeout_secs,
            })?
    }

    /// Filter selecting every synced entry.
    #[must_use]
    pub fn full_filter(&self) -> String {
        let class = format!(
            "(objectClass={})",
            escape_filter_value(&self.config.user_object_class)
        );
        match &self.config.user_filter {
            Some(extra) => format!("(&{}{})", class, extra.trim()),
            None => format!("(&{class})"),
        }
    }

    /// Filter selecting entries modified at or after `since`.
    #[must_use]
    pub fn changed_since_filter(&self, since: DateTime<Utc>) -> String {
        let class = format!(
            "(objectClass={})",
            escape_filter_value(&self.config.user_object_class)
        );
        let changed = format!(
            "({}>={})",
            self.config.attributes.modified_at,
            escape_filter_value(&format_generalized_time(since))
        );
        match &self.config.user_filter {
            Some(extra) => format!("(&{}{}{})", class, extra.trim(), changed),
            None => format!("(&{class}{changed})"),
        }
    }
}

#[async_trait]
impl DirectorySource for LdapDirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn list_all(&self) -> DirectoryResult<Vec<DirectoryRecord>> {
        let records = self.fetch(&self.full_filter()).await?;
        info!(records = records.len(), "LDAP full snapshot fetched");
        Ok(records)
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn list_changed_since(
        &self,
        since: DateTime<Utc>,
    ) -> DirectoryResult<Vec<DirectoryRecord>> {
        let records = self.fetch(&self.changed_since_filter(since)).await?;
        info!(records = records.len(), %since, "LDAP incremental snapshot fetched");
        Ok(records)
    }
}

impl std::fmt::Debug for LdapDirectorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectorySource")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Map one search entry onto a raw record.
///
/// Attribute names compare case-insensitively; multi-valued attributes
/// contribute their first value.
fn entry_to_record(map: &AttributeMap, entry: SearchEntry) -> DirectoryRecord {
    let attrs: HashMap<String, String> = entry
        .attrs
        .into_iter()
        .filter_map(|(name, values)| {
            values
                .into_iter()
                .next()
                .map(|value| (name.to_ascii_lowercase(), value))
        })
        .collect();
    let get = |name: &str| attrs.get(&name.to_ascii_lowercase()).cloned();

    let modified_at = get(&map.modified_at).and_then(|raw| {
        let parsed = parse_generalized_time(&raw);
        if parsed.is_none() {
            debug!(value = %raw, "Unparsable modification timestamp");
        }
        parsed
    });

    DirectoryRecord {
        external_id: get(&map.external_id),
        distinguished_name: Some(entry.dn).filter(|dn| !dn.is_empty()),
        uid_number: get(&map.uid_number),
        gid_number: get(&map.gid_number),
        home_path: get(&map.home_path),
        login_shell: get(&map.login_shell),
        display_name: map
            .display_name
            .iter()
            .filter_map(|name| get(name))
            .find(|v| !v.trim().is_empty()),
        email: get(&map.email),
        phone: get(&map.phone),
        modified_at,
    }
}

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Format a timestamp as LDAP generalized time in UTC.
#[must_use]
pub fn format_generalized_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%SZ").to_string()
}

/// Parse LDAP generalized time (`YYYYMMDDHHMMSS[.f]Z` or with a `+hhmm` offset).
#[must_use]
pub fn parse_generalized_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.len() < 14 || !raw.is_char_boundary(14) {
        return None;
    }
    let (stamp, rest) = raw.split_at(14);
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok()?;

    // Drop fractional seconds.
    let zone = rest
        .strip_prefix(['.', ','])
        .map_or(rest, |frac| frac.trim_start_matches(|c: char| c.is_ascii_digit()));

    match zone {
        "Z" | "" => Some(naive.and_utc()),
        offset => {
            let with_offset = format!("{stamp}{offset}");
            DateTime::parse_from_str(&with_offset, "%Y%m%d%H%M%S%z")
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source() -> LdapDirectorySource {
        LdapDirectorySource::new(
            LdapConfig::new(
                "ldap.example.edu",
                "dc=example,dc=edu",
                "cn=reader,dc=example,dc=edu",
            )
            .with_user_container("ou=people"),
        )
        .unwrap()
    }

    fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
        SearchEntry {
            dn: dn.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.iter().map(|s| (*s).to_string()).collect()))
                .collect(),
            bin_attrs: HashMap::new(),
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = LdapDirectorySource::new(LdapConfig::new("", "dc=x", "cn=y")).unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_full_filter() {
        assert_eq!(source().full_filter(), "(&(objectClass=posixAccount))");

        let mut config = source().config().clone();
        config.user_filter = Some("(memberOf=cn=lab,ou=groups,dc=example,dc=edu)".to_string());
        let filtered = LdapDirectorySource::new(config).unwrap();
        assert_eq!(
            filtered.full_filter(),
            "(&(objectClass=posixAccount)(memberOf=cn=lab,ou=groups,dc=example,dc=edu))"
        );
    }

    #[test]
    fn test_changed_since_filter() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            source().changed_since_filter(since),
            "(&(objectClass=posixAccount)(modifyTimestamp>=20240101120000Z))"
        );
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("John Doe"), "John Doe");
        assert_eq!(escape_filter_value("John*"), "John\\2a");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("a\\b"), "a\\5cb");
    }

    #[test]
    fn test_entry_to_record() {
        let map = AttributeMap::default();
        let record = entry_to_record(
            &map,
            entry(
                "uid=u1,ou=people,dc=example,dc=edu",
                &[
                    ("uid", &["u1"]),
                    ("UIDNumber", &["1001"]),
                    ("gidNumber", &["100"]),
                    ("homeDirectory", &["/home/u1"]),
                    ("loginShell", &["/bin/bash"]),
                    ("cn", &["Alice Liddell"]),
                    ("mail", &["alice@ldap-system.local", "alias@ldap-system.local"]),
                    ("modifyTimestamp", &["20240620153045Z"]),
                ],
            ),
        );

        assert_eq!(record.external_id.as_deref(), Some("u1"));
        assert_eq!(
            record.distinguished_name.as_deref(),
            Some("uid=u1,ou=people,dc=example,dc=edu")
        );
        assert_eq!(record.uid_number.as_deref(), Some("1001"));
        assert_eq!(record.home_path.as_deref(), Some("/home/u1"));
        // displayName missing, cn is the fallback
        assert_eq!(record.display_name.as_deref(), Some("Alice Liddell"));
        assert_eq!(record.email.as_deref(), Some("alice@ldap-system.local"));
        assert!(record.phone.is_none());
        assert_eq!(
            record.modified_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 20, 15, 30, 45).unwrap())
        );
    }

    #[test]
    fn test_entry_without_external_id_is_still_mapped() {
        let record = entry_to_record(
            &AttributeMap::default(),
            entry("cn=orphan,dc=example,dc=edu", &[("homeDirectory", &["/home/x"])]),
        );
        assert!(record.external_id.is_none());
        assert_eq!(record.home_path.as_deref(), Some("/home/x"));
    }

    #[test]
    fn test_parse_generalized_time() {
        let expected = Utc.with_ymd_and_hms(2024, 6, 20, 15, 30, 45).unwrap();
        assert_eq!(parse_generalized_time("20240620153045Z"), Some(expected));
        assert_eq!(parse_generalized_time("20240620153045.0Z"), Some(expected));
        assert_eq!(parse_generalized_time("20240620173045+0200"), Some(expected));
        assert_eq!(parse_generalized_time("yesterday"), None);
        assert_eq!(format_generalized_time(expected), "20240620153045Z");
    }
}
