//! Serve command - Run scheduled syncs until interrupted

use std::future::Future;

use clap::Args;
use tokio::signal;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use labsync_reconcile::{SyncCoordinator, SyncError};

use crate::config::{Config, ScheduleConfig};
use crate::context::AppContext;
use crate::error::CliResult;

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Apply pending migrations before starting
    #[arg(long)]
    pub migrate: bool,
}

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> CliResult<()> {
    let ctx = AppContext::new(config, "scheduler", true).await?;
    if args.migrate {
        labsync_db::run_migrations(&ctx.pool).await?;
    }

    let scheduler = Scheduler::new(ctx.coordinator.clone(), config.schedule.clone());
    scheduler.run(shutdown_signal()).await;

    ctx.pool.close().await;
    Ok(())
}

/// Periodic full and incremental syncs.
///
/// Passes run inline on the scheduler task, so one process never overlaps
/// its own runs; overlap with other processes is refused by the coordinator
/// and the tick is skipped.
pub struct Scheduler {
    coordinator: SyncCoordinator,
    schedule: ScheduleConfig,
}

impl Scheduler {
    pub fn new(coordinator: SyncCoordinator, schedule: ScheduleConfig) -> Self {
        Self {
            coordinator,
            schedule,
        }
    }

    /// Run until `shutdown` resolves. A pass in progress is finished first.
    #[instrument(skip(self, shutdown))]
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            full_interval_secs = self.schedule.full_interval.as_secs(),
            incremental_interval_secs = self.schedule.incremental_interval.map(|d| d.as_secs()),
            "Starting sync scheduler"
        );

        let mut full = interval(self.schedule.full_interval);
        full.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first incremental pass waits one period, after the initial full sync.
        let mut incremental = self.schedule.incremental_interval.map(|period| {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticks
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = full.tick() => {
                    self.full_tick().await;
                }
                _ = next_tick(incremental.as_mut()) => {
                    self.incremental_tick().await;
                }
            }
        }

        info!("Scheduler stopped");
    }

    async fn full_tick(&self) {
        match self.coordinator.run_full_sync().await {
            Ok(run) => info!(run_id = %run.id, status = %run.status, "Scheduled full sync finished"),
            Err(e) => log_tick_error("full", &e),
        }
    }

    async fn incremental_tick(&self) {
        let since = match self.coordinator.incremental_baseline().await {
            Ok(since) => since,
            Err(SyncError::NoBaseline) => {
                info!("No completed run yet, skipping incremental sync");
                return;
            }
            Err(e) => {
                log_tick_error("incremental", &e);
                return;
            }
        };
        match self.coordinator.run_incremental_sync(since).await {
            Ok(run) => info!(
                run_id = %run.id,
                status = %run.status,
                "Scheduled incremental sync finished"
            ),
            Err(e) => log_tick_error("incremental", &e),
        }
    }
}

/// Next tick of `interval`, or never when there is none.
async fn next_tick(interval: Option<&mut Interval>) -> Instant {
    match interval {
        Some(interval) => interval.tick().await,
        None => std::future::pending().await,
    }
}

fn log_tick_error(kind: &str, e: &SyncError) {
    match e {
        SyncError::AlreadyRunning { run_id } => {
            info!(kind, run_id = %run_id, "Another sync run is in progress, skipping tick");
        }
        e if e.is_retryable() => warn!(kind, error = %e, "Scheduled sync failed, will retry next tick"),
        e => error!(kind, error = %e, "Scheduled sync failed"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use labsync_core::{DirectoryRecord, StaticDirectorySource};
    use labsync_db::SyncRunKind;
    use labsync_reconcile::{MemoryStore, OwnershipPolicy, ReconcileConfig};

    fn scheduler(store: &MemoryStore, schedule: ScheduleConfig) -> Scheduler {
        let source = Arc::new(StaticDirectorySource::new(vec![
            DirectoryRecord::new("u1").with_home_path("/home/u1"),
        ]));
        let coordinator = SyncCoordinator::new(
            Arc::new(store.clone()),
            source,
            OwnershipPolicy::default(),
            ReconcileConfig::default(),
        )
        .with_origin("scheduler");
        Scheduler::new(coordinator, schedule)
    }

    #[tokio::test]
    async fn test_disabled_incremental_schedule_only_runs_full_syncs() {
        crate::logging::init_test_logging();
        let store = MemoryStore::new();
        let scheduler = scheduler(
            &store,
            ScheduleConfig {
                full_interval: Duration::from_secs(3600),
                incremental_interval: None,
            },
        );

        scheduler
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        let runs = store.runs().await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].kind, SyncRunKind::Full);
        assert_eq!(runs[0].triggered_by.as_deref(), Some("scheduler"));
        assert!(store.identity_by_external_id("u1").await.is_some());
    }

    #[tokio::test]
    async fn test_incremental_ticks_follow_first_full_sync() {
        let store = MemoryStore::new();
        let scheduler = scheduler(
            &store,
            ScheduleConfig {
                full_interval: Duration::from_secs(3600),
                incremental_interval: Some(Duration::from_millis(40)),
            },
        );

        scheduler
            .run(tokio::time::sleep(Duration::from_millis(150)))
            .await;

        let runs = store.runs().await;
        assert!(runs.iter().any(|r| r.kind == SyncRunKind::Full));
        assert!(runs.iter().any(|r| r.kind == SyncRunKind::Incremental));
        assert!(runs.iter().all(|r| !r.is_running()));
    }

    #[tokio::test]
    async fn test_next_tick_without_interval_never_fires() {
        let waited = tokio::time::timeout(Duration::from_millis(50), next_tick(None)).await;
        assert!(waited.is_err());

        let mut ticks = interval(Duration::from_millis(10));
        let fired = tokio::time::timeout(Duration::from_millis(50), next_tick(Some(&mut ticks))).await;
        assert!(fired.is_ok());
    }
}
