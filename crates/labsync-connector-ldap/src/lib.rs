//! # LDAP Directory Source
//!
//! Reads directory snapshots for labsync from an LDAP server.
//!
//! ## Example
//!
//! ```ignore
//! use labsync_connector_ldap::{LdapConfig, LdapDirectorySource};
//! use labsync_core::DirectorySource;
//!
//! let config = LdapConfig::new(
//!     "ldap.example.edu",
//!     "dc=example,dc=edu",
//!     "cn=reader,dc=example,dc=edu",
//! )
//! .with_password("secret")
//! .with_user_container("ou=people")
//! .with_ssl();
//!
//! let source = LdapDirectorySource::new(config)?;
//! let records = source.list_all().await?;
//! ```

pub mod config;
pub mod source;

// Re-exports
pub use config::{AttributeMap, LdapConfig};
pub use source::LdapDirectorySource;
