//! Wiring shared by the commands: pool, directory source and coordinator.

use std::sync::Arc;

use tracing::info;

use labsync_connector_ldap::LdapDirectorySource;
use labsync_core::{DirectorySource, IdentityId, SnapshotFileSource, StaticDirectorySource};
use labsync_db::{DbPool, Identity};
use labsync_reconcile::{PgIdentityStore, SyncCoordinator};

use crate::config::{Config, SourceConfig};
use crate::error::{CliError, CliResult};

/// Connect to the database.
pub async fn connect(config: &Config) -> CliResult<DbPool> {
    let pool = DbPool::connect_with(&config.database_url, config.database_max_connections).await?;
    Ok(pool)
}

/// Build the configured directory source.
pub fn directory_source(config: &Config) -> CliResult<Arc<dyn DirectorySource>> {
    let source: Arc<dyn DirectorySource> = match config.require_source()? {
        SourceConfig::Ldap(ldap) => {
            info!(url = %ldap.url(), base_dn = %ldap.base_dn, "Using LDAP directory source");
            Arc::new(LdapDirectorySource::new(ldap.clone())?)
        }
        SourceConfig::SnapshotFile(path) => {
            info!(path = %path.display(), "Using snapshot file directory source");
            Arc::new(SnapshotFileSource::new(path.clone()))
        }
    };
    Ok(source)
}

/// Everything a command needs to talk to the store.
pub struct AppContext {
    pub pool: DbPool,
    pub coordinator: SyncCoordinator,
}

impl AppContext {
    /// Build a context whose runs are tagged with `origin`.
    ///
    /// Commands that never fetch a snapshot pass `with_source = false` and
    /// get an empty source, so they work without directory settings.
    pub async fn new(config: &Config, origin: &str, with_source: bool) -> CliResult<Self> {
        let pool = connect(config).await?;
        let source = if with_source {
            directory_source(config)?
        } else {
            Arc::new(StaticDirectorySource::new(Vec::new()))
        };

        let coordinator = SyncCoordinator::new(
            Arc::new(PgIdentityStore::new(pool.clone())),
            source,
            config.ownership.clone(),
            config.reconcile.clone(),
        )
        .with_origin(origin);

        Ok(Self { pool, coordinator })
    }

    /// Resolve an identity by external id.
    pub async fn identity(&self, external_id: &str) -> CliResult<Identity> {
        Identity::find_by_external_id(self.pool.inner(), external_id)
            .await
            .map_err(labsync_db::DbError::QueryFailed)?
            .ok_or_else(|| CliError::NotFound(format!("identity {external_id}")))
    }

    pub async fn identity_id(&self, external_id: &str) -> CliResult<IdentityId> {
        Ok(self.identity(external_id).await?.identity_id())
    }
}
