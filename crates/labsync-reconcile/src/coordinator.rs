//! Sync-run coordinator.
//!
//! Opens a run under the persisted run-in-progress marker, drives every
//! snapshot record through the lifecycle manager in its own transaction,
//! runs the deactivation sweep after a full snapshot and closes the run with
//! its statistics.
//!
//! ```text
//! starting ──> running ──> completed
//!                  └─────> failed
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use labsync_core::{DirectoryRecord, DirectorySource, IdentityId, RunId};
use labsync_db::{NewSyncRun, RoleProfile, RunCompletion, SyncRun, SyncRunKind, SyncRunStatus};

use crate::cascade::{CascadeManager, DeletionSummary, RoleAssignment, UnassignSummary};
use crate::config::ReconcileConfig;
use crate::detector::{detect_protected, ProtectedSet};
use crate::error::{CascadeResult, StoreError, SyncError, SyncResult};
use crate::lifecycle::{LifecycleManager, RecordOutcome};
use crate::ownership::OwnershipPolicy;
use crate::record::{RecordValidator, ValidatedRecord};
use crate::requests::RequestService;
use crate::statistics::SyncStatistics;
use crate::store::{role_profile_of, IdentityStore};

/// Failure message written on runs reclaimed by timeout.
pub const STALE_RUN_MESSAGE: &str = "Run exceeded its timeout and was reclaimed";

/// Entry point for reconciliation passes and the operations around them.
#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<dyn IdentityStore>,
    source: Arc<dyn DirectorySource>,
    lifecycle: Arc<LifecycleManager>,
    cascade: CascadeManager,
    requests: RequestService,
    config: Arc<ReconcileConfig>,
    origin: Option<String>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        source: Arc<dyn DirectorySource>,
        policy: OwnershipPolicy,
        config: ReconcileConfig,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            cascade: CascadeManager::new(Arc::clone(&store), config.dependent_students),
            requests: RequestService::new(Arc::clone(&store), Arc::clone(&config)),
            lifecycle: Arc::new(LifecycleManager::new(policy)),
            store,
            source,
            config,
            origin: None,
        }
    }

    /// Record `origin` as `triggered_by` on the runs this coordinator opens.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    #[must_use]
    pub fn cascade(&self) -> &CascadeManager {
        &self.cascade
    }

    #[must_use]
    pub fn requests(&self) -> &RequestService {
        &self.requests
    }

    /// Start a full sync in the background and return its run id.
    pub async fn start_full_sync(&self) -> SyncResult<RunId> {
        let run = self.begin_run(SyncRunKind::Full, None).await?;
        Ok(self.spawn(run))
    }

    /// Start an incremental sync in the background and return its run id.
    pub async fn start_incremental_sync(&self, since: DateTime<Utc>) -> SyncResult<RunId> {
        let run = self.begin_run(SyncRunKind::Incremental, Some(since)).await?;
        Ok(self.spawn(run))
    }

    /// Run a full sync to completion.
    pub async fn run_full_sync(&self) -> SyncResult<SyncRun> {
        let run = self.begin_run(SyncRunKind::Full, None).await?;
        self.execute(run).await
    }

    /// Run an incremental sync to completion.
    pub async fn run_incremental_sync(&self, since: DateTime<Utc>) -> SyncResult<SyncRun> {
        let run = self.begin_run(SyncRunKind::Incremental, Some(since)).await?;
        self.execute(run).await
    }

    fn spawn(&self, run: SyncRun) -> RunId {
        let run_id = run.run_id();
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.execute(run).await {
                error!(run_id = %run_id, error = %err, "Background sync run failed");
            }
        });
        run_id
    }

    /// Open a run: reclaim stale runs, refuse if one is still running, then
    /// insert the new row. All under the run marker lock.
    #[instrument(skip(self), fields(kind = %kind))]
    async fn begin_run(
        &self,
        kind: SyncRunKind,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncRun> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        tx.lock_run_marker().await?;

        let stale_before = chrono::Duration::from_std(self.config.run_timeout())
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout));
        if let Some(cutoff) = stale_before {
            for stale in tx.fail_stale_runs(cutoff, STALE_RUN_MESSAGE).await? {
                warn!(
                    run_id = %stale.id,
                    started_at = %stale.started_at,
                    "Reclaimed stale sync run as failed"
                );
            }
        }

        if let Some(running) = tx.find_running_run().await? {
            return Err(SyncError::AlreadyRunning {
                run_id: running.run_id(),
            });
        }

        let run = tx
            .insert_run(&NewSyncRun {
                kind,
                since,
                triggered_by: self.origin.clone(),
                started_at: now,
            })
            .await?;
        tx.commit().await?;

        info!(run_id = %run.id, since = ?since, "Sync run started");
        Ok(run)
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, kind = %run.kind))]
    async fn execute(&self, run: SyncRun) -> SyncResult<SyncRun> {
        let fetched = match (run.kind, run.since) {
            (SyncRunKind::Incremental, Some(since)) => self.source.list_changed_since(since).await,
            _ => self.source.list_all().await,
        };
        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                error!(source = self.source.name(), error = %err, "Directory snapshot fetch failed");
                self.close_run(
                    &run,
                    SyncRunStatus::Failed,
                    &SyncStatistics::new(),
                    Some(format!("Directory source failed: {err}")),
                )
                .await?;
                return Err(SyncError::Source(err));
            }
        };
        info!(records = records.len(), "Directory snapshot fetched");

        let (stats, validator) = self.process(&run, &records).await;
        let mut stats = stats;

        let mut sweep_error = None;
        if run.kind == SyncRunKind::Full {
            match self.cascade.deactivate_missing(validator.seen()).await {
                Ok(summary) => stats.add_deactivated(summary.count() as u64),
                Err(err) => {
                    error!(error = %err, "Deactivation sweep failed");
                    sweep_error = Some(err);
                }
            }
        }

        if stats.errors_dropped > 0 {
            warn!(dropped = stats.errors_dropped, "Run error list truncated");
        }

        let (status, message) = match &sweep_error {
            Some(err) => (
                SyncRunStatus::Failed,
                Some(format!("Deactivation sweep failed: {err}")),
            ),
            None => (SyncRunStatus::Completed, None),
        };
        let finished = self.close_run(&run, status, &stats, message).await?;

        if let Some(err) = sweep_error {
            return Err(SyncError::Sweep(err));
        }

        info!(
            records_seen = finished.counters.records_seen,
            created = finished.counters.created,
            updated = finished.counters.updated,
            unchanged = finished.counters.unchanged,
            deactivated = finished.counters.deactivated,
            reactivated = finished.counters.reactivated,
            skipped = finished.counters.skipped,
            duration_ms = finished.duration_ms,
            "Sync run completed"
        );
        Ok(finished)
    }

    /// Create/update pass over the snapshot. Never fails as a whole.
    async fn process(
        &self,
        run: &SyncRun,
        records: &[DirectoryRecord],
    ) -> (SyncStatistics, RecordValidator) {
        let mut stats = SyncStatistics::new();
        let mut validator = RecordValidator::new();

        for raw in records {
            stats.record_seen();
            match validator.validate(raw) {
                Ok(record) => match self.apply_record(&record).await {
                    Ok(outcome) => stats.record_outcome(outcome),
                    Err(err) => {
                        warn!(
                            external_id = %record.external_id,
                            error = %err,
                            "Record write failed, rolled back"
                        );
                        stats.record_write_error(&record.external_id, &err);
                    }
                },
                Err(err) => {
                    warn!(kind = err.kind(), error = %err, "Skipping invalid record");
                    stats.record_error(&err);
                }
            }

            if stats.should_flush(self.config.progress_every) {
                self.flush_progress(run, &stats).await;
            }
        }

        (stats, validator)
    }

    async fn apply_record(&self, record: &ValidatedRecord) -> Result<RecordOutcome, StoreError> {
        let mut tx = self.store.begin().await?;
        let outcome = self.lifecycle.apply(tx.as_mut(), record, Utc::now()).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn flush_progress(&self, run: &SyncRun, stats: &SyncStatistics) {
        let result = async {
            let mut tx = self.store.begin().await?;
            let updated = tx
                .update_run_progress(run.run_id(), &stats.counters, &stats.errors)
                .await?;
            tx.commit().await?;
            Ok::<_, StoreError>(updated)
        }
        .await;

        match result {
            Ok(Some(_)) => {}
            Ok(None) => warn!("Run is no longer running; progress not recorded"),
            Err(err) => warn!(error = %err, "Failed to record run progress"),
        }
    }

    async fn close_run(
        &self,
        run: &SyncRun,
        status: SyncRunStatus,
        stats: &SyncStatistics,
        failure_message: Option<String>,
    ) -> SyncResult<SyncRun> {
        let completion = RunCompletion {
            status,
            finished_at: Utc::now(),
            counters: stats.counters,
            errors: stats.errors.clone(),
            failure_message,
        };

        let mut tx = self.store.begin().await?;
        let finished = tx.finish_run(run.run_id(), &completion).await?;
        tx.commit().await?;

        match finished {
            Some(finished) => Ok(finished),
            None => {
                warn!("Run was reclaimed before it finished");
                self.get_run_status(run.run_id()).await
            }
        }
    }

    /// Current state of a run, including live progress while running.
    pub async fn get_run_status(&self, run_id: RunId) -> SyncResult<SyncRun> {
        let mut tx = self.store.begin().await?;
        tx.find_run(run_id)
            .await?
            .ok_or(SyncError::RunNotFound { run_id })
    }

    /// Recent runs, newest first.
    pub async fn list_runs(&self, limit: i64) -> SyncResult<Vec<SyncRun>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.list_runs(limit).await?)
    }

    /// The most recently started run.
    pub async fn last_run(&self) -> SyncResult<Option<SyncRun>> {
        Ok(self.list_runs(1).await?.into_iter().next())
    }

    /// Start time of the last completed run, for incremental syncs.
    pub async fn incremental_baseline(&self) -> SyncResult<DateTime<Utc>> {
        let mut tx = self.store.begin().await?;
        tx.last_completed_run()
            .await?
            .map(|run| run.started_at)
            .ok_or(SyncError::NoBaseline)
    }

    /// Protected locally-owned fields of an identity, computed now.
    pub async fn get_protected_fields(&self, external_id: &str) -> SyncResult<ProtectedSet> {
        let mut tx = self.store.begin().await?;
        let identity = tx
            .find_identity_by_external_id(external_id)
            .await?
            .ok_or_else(|| SyncError::IdentityNotFound {
                external_id: external_id.to_string(),
            })?;
        let profile = role_profile_of(tx.as_mut(), &identity).await?;
        Ok(detect_protected(
            self.lifecycle.policy(),
            &identity,
            profile.as_ref(),
        ))
    }

    pub async fn assign_role(
        &self,
        id: IdentityId,
        assignment: RoleAssignment,
    ) -> CascadeResult<RoleProfile> {
        self.cascade.assign_role(id, assignment).await
    }

    pub async fn unassign_role(&self, id: IdentityId) -> CascadeResult<UnassignSummary> {
        self.cascade.unassign_role(id).await
    }

    pub async fn delete_identity(&self, id: IdentityId) -> CascadeResult<DeletionSummary> {
        self.cascade.delete_identity(id).await
    }
}
