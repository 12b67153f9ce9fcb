//! Test helpers for labsync-reconcile.
//!
//! Most tests run the coordinator against [`MemoryStore`]; the directory
//! side is either a [`StaticDirectorySource`] or one of the mock sources
//! below.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use labsync_core::{
    DirectoryError, DirectoryRecord, DirectoryResult, DirectorySource, IdentityId, RunId,
    StaticDirectorySource,
};
use labsync_db::{Identity, SyncRun};
use labsync_reconcile::{
    MemoryStore, OwnershipPolicy, PiProfileInput, ReconcileConfig, RoleAssignment,
    StudentProfileInput, SyncCoordinator,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub const PLACEHOLDER_DOMAIN: &str = "ldap-system.local";

/// Policy recognizing [`PLACEHOLDER_DOMAIN`].
pub fn policy() -> OwnershipPolicy {
    OwnershipPolicy::new([PLACEHOLDER_DOMAIN])
}

/// A typical directory account.
pub fn account(external_id: &str) -> DirectoryRecord {
    DirectoryRecord::new(external_id)
        .with_distinguished_name(format!("uid={external_id},ou=people,dc=lab,dc=example"))
        .with_uid_number("1000")
        .with_gid_number("1000")
        .with_home_path(format!("/home/{external_id}"))
        .with_login_shell("/bin/bash")
        .with_display_name(external_id.to_uppercase())
}

/// Coordinator over an in-memory store and a replaceable static source.
pub struct Harness {
    pub store: MemoryStore,
    pub source: Arc<StaticDirectorySource>,
    pub coordinator: SyncCoordinator,
}

impl Harness {
    pub fn new(records: Vec<DirectoryRecord>) -> Self {
        Self::with_config(records, policy(), ReconcileConfig::default())
    }

    pub fn with_config(
        records: Vec<DirectoryRecord>,
        policy: OwnershipPolicy,
        config: ReconcileConfig,
    ) -> Self {
        init_test_logging();

        let store = MemoryStore::new();
        let source = Arc::new(StaticDirectorySource::new(records));
        let coordinator = SyncCoordinator::new(
            Arc::new(store.clone()),
            source.clone(),
            policy,
            config,
        )
        .with_origin("test");

        Self {
            store,
            source,
            coordinator,
        }
    }

    /// Coordinator sharing this harness' store but reading from `source`.
    pub fn coordinator_with_source(&self, source: Arc<dyn DirectorySource>) -> SyncCoordinator {
        SyncCoordinator::new(
            Arc::new(self.store.clone()),
            source,
            policy(),
            self.coordinator.config().clone(),
        )
    }

    pub async fn identity(&self, external_id: &str) -> Identity {
        self.store
            .identity_by_external_id(external_id)
            .await
            .unwrap_or_else(|| panic!("identity {external_id} should exist"))
    }

    pub async fn identity_id(&self, external_id: &str) -> IdentityId {
        self.identity(external_id).await.identity_id()
    }

    pub async fn make_pi(&self, external_id: &str) -> IdentityId {
        let id = self.identity_id(external_id).await;
        self.coordinator
            .assign_role(
                id,
                RoleAssignment::Pi(PiProfileInput {
                    department: Some("Physics".to_string()),
                    lab_name: Some(format!("{external_id} lab")),
                }),
            )
            .await
            .expect("PI assignment should succeed");
        id
    }

    pub async fn make_student(&self, external_id: &str, pi: IdentityId) -> IdentityId {
        let id = self.identity_id(external_id).await;
        self.coordinator
            .assign_role(
                id,
                RoleAssignment::Student(StudentProfileInput {
                    pi_identity_id: Some(pi),
                    academic_program: Some("PhD".to_string()),
                    enrollment_status: Some("enrolled".to_string()),
                }),
            )
            .await
            .expect("student assignment should succeed");
        id
    }
}

/// Poll until the run leaves `running`.
pub async fn wait_for_run(coordinator: &SyncCoordinator, run_id: RunId) -> SyncRun {
    for _ in 0..200 {
        let run = coordinator
            .get_run_status(run_id)
            .await
            .expect("run should exist");
        if !run.is_running() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} did not finish");
}

/// Source that always fails.
pub struct FailingSource;

#[async_trait]
impl DirectorySource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn list_all(&self) -> DirectoryResult<Vec<DirectoryRecord>> {
        Err(DirectoryError::unreachable("connection refused"))
    }

    async fn list_changed_since(
        &self,
        _since: DateTime<Utc>,
    ) -> DirectoryResult<Vec<DirectoryRecord>> {
        Err(DirectoryError::unreachable("connection refused"))
    }
}

/// Source that counts calls and records which query was used.
#[derive(Default)]
pub struct CountingSource {
    pub records: Vec<DirectoryRecord>,
    pub full_calls: AtomicUsize,
    pub changed_calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(records: Vec<DirectoryRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }

    pub fn changed_calls(&self) -> usize {
        self.changed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectorySource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn list_all(&self) -> DirectoryResult<Vec<DirectoryRecord>> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }

    async fn list_changed_since(
        &self,
        _since: DateTime<Utc>,
    ) -> DirectoryResult<Vec<DirectoryRecord>> {
        self.changed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// Source that blocks inside the fetch until released.
pub struct GatedSource {
    records: Vec<DirectoryRecord>,
    entered: Notify,
    release: Notify,
}

impl GatedSource {
    pub fn new(records: Vec<DirectoryRecord>) -> Self {
        Self {
            records,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Wait until a fetch is blocked on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn gate(&self) -> Vec<DirectoryRecord> {
        self.entered.notify_one();
        self.release.notified().await;
        self.records.clone()
    }
}

#[async_trait]
impl DirectorySource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }

    async fn list_all(&self) -> DirectoryResult<Vec<DirectoryRecord>> {
        Ok(self.gate().await)
    }

    async fn list_changed_since(
        &self,
        _since: DateTime<Utc>,
    ) -> DirectoryResult<Vec<DirectoryRecord>> {
        Ok(self.gate().await)
    }
}
