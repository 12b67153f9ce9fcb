//! LDAP source configuration
//!
//! Connection, search scope and attribute mapping for the LDAP directory
//! source.

use serde::{Deserialize, Serialize};

use labsync_core::{DirectoryError, DirectoryResult};

/// Configuration for the LDAP directory source.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Skip certificate verification. Test directories only.
    #[serde(default)]
    pub no_tls_verify: bool,

    /// Base DN (e.g., "dc=example,dc=edu").
    pub base_dn: String,

    /// Bind DN for authentication.
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// User container relative to `base_dn` (e.g., "ou=people").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_container: Option<String>,

    /// Object class every synced entry carries.
    #[serde(default = "default_user_object_class")]
    pub user_object_class: String,

    /// Extra filter ANDed into every search, in LDAP filter syntax.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_filter: Option<String>,

    /// Directory attribute names for each record field.
    #[serde(default)]
    pub attributes: AttributeMap,

    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Upper bound for a whole search, in seconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("no_tls_verify", &self.no_tls_verify)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("user_container", &self.user_container)
            .field("user_object_class", &self.user_object_class)
            .field("user_filter", &self.user_filter)
            .field("attributes", &self.attributes)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("search_timeout_secs", &self.search_timeout_secs)
            .finish()
    }
}

/// Directory attribute names mapped onto [`labsync_core::DirectoryRecord`] fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMap {
    #[serde(default = "default_external_id_attr")]
    pub external_id: String,
    #[serde(default = "default_uid_number_attr")]
    pub uid_number: String,
    #[serde(default = "default_gid_number_attr")]
    pub gid_number: String,
    #[serde(default = "default_home_path_attr")]
    pub home_path: String,
    #[serde(default = "default_login_shell_attr")]
    pub login_shell: String,
    /// Tried in order; the first non-empty value wins.
    #[serde(default = "default_display_name_attrs")]
    pub display_name: Vec<String>,
    #[serde(default = "default_email_attr")]
    pub email: String,
    #[serde(default = "default_phone_attr")]
    pub phone: String,
    #[serde(default = "default_modified_at_attr")]
    pub modified_at: String,
}

impl Default for AttributeMap {
    fn default() -> Self {
        Self {
            external_id: default_external_id_attr(),
            uid_number: default_uid_number_attr(),
            gid_number: default_gid_number_attr(),
            home_path: default_home_path_attr(),
            login_shell: default_login_shell_attr(),
            display_name: default_display_name_attrs(),
            email: default_email_attr(),
            phone: default_phone_attr(),
            modified_at: default_modified_at_attr(),
        }
    }
}

impl AttributeMap {
    /// Attribute list to request from the server.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        let mut attrs = vec![
            self.external_id.clone(),
            self.uid_number.clone(),
            self.gid_number.clone(),
            self.home_path.clone(),
            self.login_shell.clone(),
            self.email.clone(),
            self.phone.clone(),
            self.modified_at.clone(),
        ];
        attrs.extend(self.display_name.iter().cloned());
        attrs.dedup();
        attrs
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_user_object_class() -> String {
    "posixAccount".to_string()
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_search_timeout() -> u64 {
    120
}

fn default_external_id_attr() -> String {
    "uid".to_string()
}

fn default_uid_number_attr() -> String {
    "uidNumber".to_string()
}

fn default_gid_number_attr() -> String {
    "gidNumber".to_string()
}

fn default_home_path_attr() -> String {
    "homeDirectory".to_string()
}

fn default_login_shell_attr() -> String {
    "loginShell".to_string()
}

fn default_display_name_attrs() -> Vec<String> {
    vec!["displayName".to_string(), "cn".to_string()]
}

fn default_email_attr() -> String {
    "mail".to_string()
}

fn default_phone_attr() -> String {
    "telephoneNumber".to_string()
}

fn default_modified_at_attr() -> String {
    "modifyTimestamp".to_string()
}

impl LdapConfig {
    /// Plain LDAP on port 389, people searched directly under `base_dn`.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            no_tls_verify: false,
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            user_container: None,
            user_object_class: default_user_object_class(),
            user_filter: None,
            attributes: AttributeMap::default(),
            connection_timeout_secs: default_connection_timeout(),
            search_timeout_secs: default_search_timeout(),
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// LDAPS on port 636.
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Search people under `container`, relative to `base_dn`.
    #[must_use]
    pub fn with_user_container(mut self, container: impl Into<String>) -> Self {
        self.user_container = Some(container.into());
        self
    }

    #[must_use]
    pub fn with_user_filter(mut self, filter: impl Into<String>) -> Self {
        self.user_filter = Some(filter.into());
        self
    }

    /// Search base for people entries.
    #[must_use]
    pub fn user_dn(&self) -> String {
        self.user_container
            .as_deref()
            .map_or_else(|| self.base_dn.clone(), |ou| format!("{ou},{}", self.base_dn))
    }

    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{scheme}://{host}:{port}", host = self.host, port = self.port)
    }

    /// Reject settings the source could never search with.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.host.is_empty() {
            return Err(DirectoryError::invalid_configuration("host is required"));
        }

        if self.base_dn.is_empty() {
            return Err(DirectoryError::invalid_configuration("base_dn is required"));
        }

        if self.bind_dn.is_empty() {
            return Err(DirectoryError::invalid_configuration("bind_dn is required"));
        }

        if self.use_ssl && self.use_starttls {
            return Err(DirectoryError::invalid_configuration(
                "cannot use both SSL and STARTTLS",
            ));
        }

        if self.user_object_class.is_empty() || self.attributes.external_id.is_empty() {
            return Err(DirectoryError::invalid_configuration(
                "user_object_class and the external id attribute are required",
            ));
        }

        if let Some(filter) = &self.user_filter {
            let trimmed = filter.trim();
            if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
                return Err(DirectoryError::invalid_configuration(
                    "user_filter must be a parenthesized LDAP filter",
                ));
            }
        }

        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LdapConfig {
        LdapConfig::new(
            "ldap.example.edu",
            "dc=example,dc=edu",
            "cn=reader,dc=example,dc=edu",
        )
    }

    #[test]
    fn test_defaults_read_posix_accounts_over_plain_ldap() {
        let config = config().with_password("secret");

        assert_eq!(config.host, "ldap.example.edu");
        assert_eq!(config.port, 389);
        assert_eq!(config.user_object_class, "posixAccount");
        assert_eq!(config.bind_password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_url_follows_tls_mode() {
        assert_eq!(config().url(), "ldap://ldap.example.edu:389");
        assert_eq!(config().with_ssl().url(), "ldaps://ldap.example.edu:636");
    }

    #[test]
    fn test_people_are_searched_under_container() {
        assert_eq!(config().user_dn(), "dc=example,dc=edu");
        assert_eq!(
            config().with_user_container("ou=people").user_dn(),
            "ou=people,dc=example,dc=edu"
        );
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        assert!(config().validate().is_ok());

        let empty_host = LdapConfig::new("", "dc=example,dc=edu", "cn=reader");
        assert!(empty_host.validate().is_err());

        let mut both = config().with_ssl();
        both.use_starttls = true;
        assert!(both.validate().is_err());

        let bad_filter = config().with_user_filter("ou=people");
        assert!(bad_filter.validate().is_err());
        assert!(config()
            .with_user_filter("(memberOf=cn=lab,dc=example,dc=edu)")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_debug_masks_bind_password() {
        let config = config().with_password("super-secret");
        let debug = format!("{config:?}");

        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("***REDACTED***"));
    }

    #[test]
    fn test_attribute_map_defaults_from_partial_json() {
        let json = r#"{
            "host": "ldap.example.edu",
            "base_dn": "dc=example,dc=edu",
            "bind_dn": "cn=reader,dc=example,dc=edu",
            "attributes": { "email": "mailPrimaryAddress" }
        }"#;
        let parsed: LdapConfig = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.attributes.email, "mailPrimaryAddress");
        assert_eq!(parsed.attributes.external_id, "uid");
        assert_eq!(parsed.search_timeout_secs, 120);
        assert!(parsed.attributes.requested().contains(&"cn".to_string()));
    }
}
