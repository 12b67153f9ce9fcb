//! Sync run audit records.
//!
//! Every reconciliation pass, full or incremental, leaves one row here. A
//! row in `running` status doubles as the persisted run-in-progress marker:
//! a partial unique index forbids a second one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor};
use std::fmt;
use uuid::Uuid;

use labsync_core::RunId;

/// Key for the transaction-scoped advisory lock taken while starting a run.
const RUN_START_LOCK_KEY: i64 = 0x6c61_6273_796e_63;

/// Kind of sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncRunKind {
    /// Complete snapshot; absent identities get deactivated.
    #[default]
    Full,
    /// Changed records only; nothing is deactivated.
    Incremental,
}

impl fmt::Display for SyncRunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

impl std::str::FromStr for SyncRunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            _ => Err(format!("Unknown sync run kind: {s}")),
        }
    }
}

/// Status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    /// Check if this status is terminal (run has ended).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown sync run status: {s}")),
        }
    }
}

/// Per-run outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RunCounters {
    pub records_seen: i64,
    pub created: i64,
    pub updated: i64,
    pub unchanged: i64,
    pub deactivated: i64,
    pub reactivated: i64,
    pub skipped: i64,
}

impl RunCounters {
    /// Number of identities the run wrote to.
    #[must_use]
    pub fn touched(&self) -> i64 {
        self.created + self.updated + self.deactivated + self.reactivated
    }
}

/// One record-level problem collected during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunErrorEntry {
    /// External id of the offending record, when it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Machine-readable category, e.g. `missing_external_id`.
    pub kind: String,
    pub message: String,
}

/// A sync run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncRun {
    pub id: Uuid,
    pub kind: SyncRunKind,
    pub status: SyncRunStatus,
    /// Lower bound of an incremental run.
    pub since: Option<DateTime<Utc>>,
    /// Free-form origin of the run, e.g. `scheduler` or `cli`.
    pub triggered_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub counters: RunCounters,
    pub errors: Json<Vec<RunErrorEntry>>,
    /// Reason the run as a whole failed.
    pub failure_message: Option<String>,
}

/// Input for opening a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncRun {
    pub kind: SyncRunKind,
    pub since: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl NewSyncRun {
    #[must_use]
    pub fn into_run(self, id: Uuid) -> SyncRun {
        SyncRun {
            id,
            kind: self.kind,
            status: SyncRunStatus::Running,
            since: self.since,
            triggered_by: self.triggered_by,
            started_at: self.started_at,
            finished_at: None,
            duration_ms: None,
            counters: RunCounters::default(),
            errors: Json(Vec::new()),
            failure_message: None,
        }
    }
}

/// Terminal state written when a run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub status: SyncRunStatus,
    pub finished_at: DateTime<Utc>,
    pub counters: RunCounters,
    pub errors: Vec<RunErrorEntry>,
    pub failure_message: Option<String>,
}

impl SyncRun {
    /// Get the run ID as a typed `RunId`.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        RunId::from_uuid(self.id)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == SyncRunStatus::Running
    }

    /// Whether a running row has outlived `timeout`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.is_running() && self.started_at + timeout < now
    }

    /// Apply a completion in memory.
    pub fn complete(&mut self, completion: &RunCompletion) {
        self.status = completion.status;
        self.finished_at = Some(completion.finished_at);
        self.duration_ms = Some(duration_ms(self.started_at, completion.finished_at));
        self.counters = completion.counters;
        self.errors = Json(completion.errors.clone());
        self.failure_message.clone_from(&completion.failure_message);
    }

    /// Serialize the run-start critical section across processes.
    ///
    /// Held until the surrounding transaction ends.
    pub async fn acquire_start_lock<'e, E>(executor: E) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(RUN_START_LOCK_KEY)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Open a run in `running` status.
    pub async fn insert<'e, E>(executor: E, input: &NewSyncRun) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            INSERT INTO sync_runs (kind, status, since, triggered_by, started_at)
            VALUES ($1, 'running', $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(input.kind)
        .bind(input.since)
        .bind(&input.triggered_by)
        .bind(input.started_at)
        .fetch_one(executor)
        .await
    }

    /// Find run by ID.
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM sync_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Find the run currently in progress, if any.
    pub async fn find_running<'e, E>(executor: E) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM sync_runs WHERE status = 'running' LIMIT 1")
            .fetch_optional(executor)
            .await
    }

    /// Fail every running row started before `started_before`.
    pub async fn fail_stale<'e, E>(
        executor: E,
        started_before: DateTime<Utc>,
        message: &str,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE sync_runs
            SET status = 'failed',
                finished_at = NOW(),
                duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT,
                failure_message = $2
            WHERE status = 'running' AND started_at < $1
            RETURNING *
            ",
        )
        .bind(started_before)
        .bind(message)
        .fetch_all(executor)
        .await
    }

    /// Persist the counters of a run still in progress.
    pub async fn update_progress<'e, E>(
        executor: E,
        id: Uuid,
        counters: &RunCounters,
        errors: &[RunErrorEntry],
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE sync_runs
            SET records_seen = $2, created = $3, updated = $4, unchanged = $5,
                deactivated = $6, reactivated = $7, skipped = $8, errors = $9
            WHERE id = $1 AND status = 'running'
            RETURNING *
            ",
        )
        .bind(id)
        .bind(counters.records_seen)
        .bind(counters.created)
        .bind(counters.updated)
        .bind(counters.unchanged)
        .bind(counters.deactivated)
        .bind(counters.reactivated)
        .bind(counters.skipped)
        .bind(Json(errors))
        .fetch_optional(executor)
        .await
    }

    /// Close a running row.
    ///
    /// Returns `None` when the row is gone or no longer running, which
    /// happens when another process reclaimed it as stale.
    pub async fn finish<'e, E>(
        executor: E,
        id: Uuid,
        completion: &RunCompletion,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            UPDATE sync_runs
            SET status = $2, finished_at = $3,
                duration_ms = (EXTRACT(EPOCH FROM ($3 - started_at)) * 1000)::BIGINT,
                records_seen = $4, created = $5, updated = $6, unchanged = $7,
                deactivated = $8, reactivated = $9, skipped = $10,
                errors = $11, failure_message = $12
            WHERE id = $1 AND status = 'running'
            RETURNING *
            ",
        )
        .bind(id)
        .bind(completion.status)
        .bind(completion.finished_at)
        .bind(completion.counters.records_seen)
        .bind(completion.counters.created)
        .bind(completion.counters.updated)
        .bind(completion.counters.unchanged)
        .bind(completion.counters.deactivated)
        .bind(completion.counters.reactivated)
        .bind(completion.counters.skipped)
        .bind(Json(&completion.errors))
        .bind(&completion.failure_message)
        .fetch_optional(executor)
        .await
    }

    /// List recent runs, newest first.
    pub async fn list_recent<'e, E>(executor: E, limit: i64) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM sync_runs ORDER BY started_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(executor)
            .await
    }

    /// Most recent completed run of either kind.
    pub async fn last_completed<'e, E>(executor: E) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            r"
            SELECT * FROM sync_runs
            WHERE status = 'completed'
            ORDER BY started_at DESC
            LIMIT 1
            ",
        )
        .fetch_optional(executor)
        .await
    }
}

fn duration_ms(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> i64 {
    (finished_at - started_at).num_milliseconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn running(started_at: DateTime<Utc>) -> SyncRun {
        NewSyncRun {
            kind: SyncRunKind::Full,
            since: None,
            triggered_by: Some("test".to_string()),
            started_at,
        }
        .into_run(Uuid::new_v4())
    }

    #[test]
    fn test_status_terminal() {
        assert!(!SyncRunStatus::Running.is_terminal());
        assert!(SyncRunStatus::Completed.is_terminal());
        assert!(SyncRunStatus::Failed.is_terminal());
        assert_eq!("FAILED".parse::<SyncRunStatus>().unwrap(), SyncRunStatus::Failed);
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let run = running(now - Duration::hours(2));
        assert!(run.is_stale(now, Duration::hours(1)));
        assert!(!run.is_stale(now, Duration::hours(3)));
    }

    #[test]
    fn test_complete_sets_duration_and_counters() {
        let started = Utc::now();
        let mut run = running(started);
        run.complete(&RunCompletion {
            status: SyncRunStatus::Completed,
            finished_at: started + Duration::milliseconds(1500),
            counters: RunCounters {
                records_seen: 3,
                created: 2,
                unchanged: 1,
                ..RunCounters::default()
            },
            errors: vec![RunErrorEntry {
                external_id: None,
                kind: "missing_external_id".to_string(),
                message: "record has no external id".to_string(),
            }],
            failure_message: None,
        });

        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.duration_ms, Some(1500));
        assert_eq!(run.counters.touched(), 2);
        assert_eq!(run.errors.0.len(), 1);
        assert!(!run.is_stale(started + Duration::days(1), Duration::hours(1)));
    }

    #[test]
    fn test_counters_flatten_in_json() {
        let run = running(Utc::now());
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["records_seen"], 0);
        assert_eq!(json["status"], "running");
        assert!(json["errors"].as_array().unwrap().is_empty());
    }
}
