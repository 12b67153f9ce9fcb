//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a variable that is set but invalid is an error,
//! never silently replaced by its default. Only `DATABASE_URL` is required;
//! a directory source (`LDAP_HOST` or `SNAPSHOT_FILE`) is required by the
//! commands that sync.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use labsync_connector_ldap::LdapConfig;
use labsync_reconcile::{DependentStudentPolicy, OwnershipPolicy, ReconcileConfig};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,labsync=debug,sqlx=warn";

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("No directory source configured: set LDAP_HOST or SNAPSHOT_FILE")]
    NoSource,

    #[error("Conflicting directory sources: set only one of LDAP_HOST and SNAPSHOT_FILE")]
    ConflictingSources,
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(format!("Unknown log format: {s}")),
        }
    }
}

/// Where directory snapshots come from.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Ldap(LdapConfig),
    /// JSON array of directory records.
    SnapshotFile(PathBuf),
}

/// Scheduler intervals for `labsync serve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub full_interval: Duration,
    /// `None` disables scheduled incremental syncs.
    pub incremental_interval: Option<Duration>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_interval: Duration::from_secs(24 * 3600),
            incremental_interval: Some(Duration::from_secs(900)),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub source: Option<SourceConfig>,
    pub ownership: OwnershipPolicy,
    pub reconcile: ReconcileConfig,
    pub schedule: ScheduleConfig,
    pub rust_log: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url =
            get("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let database_max_connections =
            parse_or(&get, "DATABASE_MAX_CONNECTIONS", labsync_db::pool::DEFAULT_MAX_CONNECTIONS)?;

        let source = match (get("LDAP_HOST"), get("SNAPSHOT_FILE")) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingSources),
            (Some(host), None) => Some(SourceConfig::Ldap(ldap_config(&get, host)?)),
            (None, Some(path)) => Some(SourceConfig::SnapshotFile(PathBuf::from(path))),
            (None, None) => None,
        };

        let domains = get("PLACEHOLDER_EMAIL_DOMAINS")
            .map(|raw| parse_comma_list(&raw))
            .unwrap_or_default();
        let seed = parse_bool(&get, "SEED_PLACEHOLDER_EMAIL", false)?;
        if seed && domains.is_empty() {
            return Err(ConfigError::invalid(
                "SEED_PLACEHOLDER_EMAIL",
                "seeding requires PLACEHOLDER_EMAIL_DOMAINS",
            ));
        }
        let ownership = OwnershipPolicy::new(domains).with_seeding(seed);

        let defaults = ReconcileConfig::default();
        let run_timeout_secs = parse_or(&get, "SYNC_RUN_TIMEOUT_SECS", defaults.run_timeout_secs)?;
        if run_timeout_secs == 0 {
            return Err(ConfigError::invalid("SYNC_RUN_TIMEOUT_SECS", "must be positive"));
        }
        let reconcile = ReconcileConfig {
            run_timeout_secs,
            progress_every: parse_or(&get, "SYNC_PROGRESS_EVERY", defaults.progress_every)?,
            dependent_students: parse_or::<DependentStudentPolicy, _>(
                &get,
                "DEPENDENT_STUDENTS",
                defaults.dependent_students,
            )?,
            cascade_identity_on_student_delete: parse_bool(
                &get,
                "CASCADE_IDENTITY_ON_STUDENT_DELETE",
                defaults.cascade_identity_on_student_delete,
            )?,
        };

        let schedule_defaults = ScheduleConfig::default();
        let full_secs: u64 = parse_or(
            &get,
            "SYNC_FULL_INTERVAL_SECS",
            schedule_defaults.full_interval.as_secs(),
        )?;
        if full_secs == 0 {
            return Err(ConfigError::invalid("SYNC_FULL_INTERVAL_SECS", "must be positive"));
        }
        let incremental_secs: u64 = parse_or(
            &get,
            "SYNC_INCREMENTAL_INTERVAL_SECS",
            schedule_defaults
                .incremental_interval
                .map_or(0, |d| d.as_secs()),
        )?;
        let schedule = ScheduleConfig {
            full_interval: Duration::from_secs(full_secs),
            incremental_interval: (incremental_secs > 0)
                .then(|| Duration::from_secs(incremental_secs)),
        };

        let rust_log = get("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let log_format = parse_or(&get, "LOG_FORMAT", LogFormat::default())?;

        Ok(Self {
            database_url,
            database_max_connections,
            source,
            ownership,
            reconcile,
            schedule,
            rust_log,
            log_format,
        })
    }

    /// The configured source, or [`ConfigError::NoSource`].
    pub fn require_source(&self) -> Result<&SourceConfig, ConfigError> {
        self.source.as_ref().ok_or(ConfigError::NoSource)
    }
}

fn ldap_config<G>(get: &G, host: String) -> Result<LdapConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let base_dn =
        get("LDAP_BASE_DN").ok_or_else(|| ConfigError::MissingVar("LDAP_BASE_DN".to_string()))?;
    let bind_dn =
        get("LDAP_BIND_DN").ok_or_else(|| ConfigError::MissingVar("LDAP_BIND_DN".to_string()))?;

    let mut config = LdapConfig::new(host, base_dn, bind_dn);
    if let Some(password) = get("LDAP_BIND_PASSWORD") {
        config = config.with_password(password);
    }
    if parse_bool(get, "LDAP_USE_SSL", false)? {
        config = config.with_ssl();
    }
    if parse_bool(get, "LDAP_USE_STARTTLS", false)? {
        config = config.with_starttls();
    }
    config.no_tls_verify = parse_bool(get, "LDAP_NO_TLS_VERIFY", false)?;
    config.port = parse_or(get, "LDAP_PORT", config.port)?;
    if let Some(container) = get("LDAP_USER_CONTAINER") {
        config = config.with_user_container(container);
    }
    if let Some(class) = get("LDAP_USER_OBJECT_CLASS") {
        config.user_object_class = class;
    }
    if let Some(filter) = get("LDAP_USER_FILTER") {
        config = config.with_user_filter(filter);
    }
    if let Some(attribute) = get("LDAP_EXTERNAL_ID_ATTRIBUTE") {
        config.attributes.external_id = attribute;
    }
    config.connection_timeout_secs =
        parse_or(get, "LDAP_CONNECTION_TIMEOUT_SECS", config.connection_timeout_secs)?;
    config.search_timeout_secs =
        parse_or(get, "LDAP_SEARCH_TIMEOUT_SECS", config.search_timeout_secs)?;

    config
        .validate()
        .map_err(|e| ConfigError::invalid("LDAP_*", e.to_string()))?;
    Ok(config)
}

fn parse_or<T, G>(get: &G, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool<G>(get: &G, var: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => Err(ConfigError::invalid(var, format!("expected a boolean, got {v:?}"))),
    }
}

/// Split a comma separated list, dropping empty items.
pub fn parse_comma_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    const DB: (&str, &str) = ("DATABASE_URL", "postgres://localhost/labsync");

    #[test]
    fn test_defaults() {
        let config = load(&[DB]).unwrap();
        assert!(config.source.is_none());
        assert!(config.ownership.placeholder_email_domains.is_empty());
        assert!(!config.ownership.seed_placeholder_email);
        assert_eq!(config.reconcile, ReconcileConfig::default());
        assert_eq!(config.schedule, ScheduleConfig::default());
        assert_eq!(config.rust_log, DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(matches!(config.require_source(), Err(ConfigError::NoSource)));
    }

    #[test]
    fn test_database_url_required() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(v) if v == "DATABASE_URL"));
    }

    #[test]
    fn test_snapshot_file_source() {
        let config = load(&[DB, ("SNAPSHOT_FILE", "/var/lib/labsync/people.json")]).unwrap();
        assert!(matches!(
            config.require_source().unwrap(),
            SourceConfig::SnapshotFile(p) if p.ends_with("people.json")
        ));
    }

    #[test]
    fn test_ldap_source() {
        let config = load(&[
            DB,
            ("LDAP_HOST", "ldap.example.edu"),
            ("LDAP_BASE_DN", "dc=example,dc=edu"),
            ("LDAP_BIND_DN", "cn=reader,dc=example,dc=edu"),
            ("LDAP_BIND_PASSWORD", "secret"),
            ("LDAP_USE_SSL", "true"),
            ("LDAP_USER_CONTAINER", "ou=people"),
        ])
        .unwrap();

        let SourceConfig::Ldap(ldap) = config.require_source().unwrap() else {
            panic!("expected an LDAP source");
        };
        assert_eq!(ldap.port, 636);
        assert_eq!(ldap.user_dn(), "ou=people,dc=example,dc=edu");
        assert!(!format!("{ldap:?}").contains("secret"));
    }

    #[test]
    fn test_ldap_requires_base_dn() {
        let err = load(&[DB, ("LDAP_HOST", "ldap.example.edu")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(v) if v == "LDAP_BASE_DN"));
    }

    #[test]
    fn test_conflicting_sources() {
        let err = load(&[DB, ("LDAP_HOST", "h"), ("SNAPSHOT_FILE", "f.json")]).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingSources));
    }

    #[test]
    fn test_reconcile_settings() {
        let config = load(&[
            DB,
            ("PLACEHOLDER_EMAIL_DOMAINS", "ldap-system.local, , legacy.local"),
            ("SEED_PLACEHOLDER_EMAIL", "yes"),
            ("SYNC_RUN_TIMEOUT_SECS", "120"),
            ("SYNC_PROGRESS_EVERY", "50"),
            ("DEPENDENT_STUDENTS", "remove"),
            ("SYNC_INCREMENTAL_INTERVAL_SECS", "0"),
            ("LOG_FORMAT", "pretty"),
        ])
        .unwrap();

        assert_eq!(
            config.ownership.placeholder_email_domains,
            vec!["ldap-system.local", "legacy.local"]
        );
        assert!(config.ownership.seed_placeholder_email);
        assert_eq!(config.reconcile.run_timeout_secs, 120);
        assert_eq!(config.reconcile.progress_every, 50);
        assert_eq!(
            config.reconcile.dependent_students,
            DependentStudentPolicy::Remove
        );
        assert!(config.schedule.incremental_interval.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let err = load(&[DB, ("SYNC_RUN_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "SYNC_RUN_TIMEOUT_SECS"));

        let err = load(&[DB, ("DEPENDENT_STUDENTS", "orphan")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "DEPENDENT_STUDENTS"));

        let err = load(&[DB, ("SEED_PLACEHOLDER_EMAIL", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = load(&[DB, ("SEED_PLACEHOLDER_EMAIL", "true")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "SEED_PLACEHOLDER_EMAIL"));

        let err = load(&[DB, ("SYNC_FULL_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_comma_list() {
        assert_eq!(parse_comma_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_comma_list(" , ").is_empty());
    }
}
