//! Run statistics tracking.
//!
//! Counts outcomes during a pass and collects the non-fatal errors that end
//! up in the run record.

use labsync_db::{RunCounters, RunErrorEntry};

use crate::error::{RecordError, StoreError};
use crate::lifecycle::RecordOutcome;

/// Error entries kept per run. Further errors are only counted.
pub const MAX_RUN_ERRORS: usize = 1000;

/// Statistics for one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncStatistics {
    pub counters: RunCounters,
    pub errors: Vec<RunErrorEntry>,
    /// Errors not stored because the list was full.
    pub errors_dropped: u64,
}

impl SyncStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_seen(&mut self) {
        self.counters.records_seen += 1;
    }

    pub fn record_outcome(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.counters.created += 1,
            RecordOutcome::Updated => self.counters.updated += 1,
            RecordOutcome::Unchanged => self.counters.unchanged += 1,
            RecordOutcome::Reactivated => self.counters.reactivated += 1,
        }
    }

    /// A record rejected by validation.
    pub fn record_error(&mut self, err: &RecordError) {
        self.push_error(RunErrorEntry {
            external_id: err.external_id().map(ToString::to_string),
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }

    /// A record whose transaction failed and was rolled back.
    pub fn record_write_error(&mut self, external_id: &str, err: &StoreError) {
        self.push_error(RunErrorEntry {
            external_id: Some(external_id.to_string()),
            kind: "write_failed".to_string(),
            message: err.to_string(),
        });
    }

    pub fn add_deactivated(&mut self, count: u64) {
        self.counters.deactivated += i64::try_from(count).unwrap_or(i64::MAX);
    }

    /// Whether counters should be flushed after the current record.
    #[must_use]
    pub fn should_flush(&self, progress_every: u64) -> bool {
        progress_every > 0
            && u64::try_from(self.counters.records_seen)
                .is_ok_and(|seen| seen > 0 && seen % progress_every == 0)
    }

    fn push_error(&mut self, entry: RunErrorEntry) {
        self.counters.skipped += 1;
        if self.errors.len() < MAX_RUN_ERRORS {
            self.errors.push(entry);
        } else {
            self.errors_dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_and_touched() {
        let mut stats = SyncStatistics::new();
        for outcome in [
            RecordOutcome::Created,
            RecordOutcome::Updated,
            RecordOutcome::Unchanged,
            RecordOutcome::Reactivated,
        ] {
            stats.record_seen();
            stats.record_outcome(outcome);
        }
        stats.add_deactivated(2);

        assert_eq!(stats.counters.records_seen, 4);
        assert_eq!(stats.counters.unchanged, 1);
        assert_eq!(stats.counters.touched(), 5);
    }

    #[test]
    fn test_errors_are_capped_but_counted() {
        let mut stats = SyncStatistics::new();
        let err = RecordError::DuplicateExternalId {
            external_id: "u1".to_string(),
        };
        for _ in 0..(MAX_RUN_ERRORS + 5) {
            stats.record_error(&err);
        }

        assert_eq!(stats.errors.len(), MAX_RUN_ERRORS);
        assert_eq!(stats.errors_dropped, 5);
        assert_eq!(stats.counters.skipped, i64::try_from(MAX_RUN_ERRORS + 5).unwrap());
        assert_eq!(stats.errors[0].kind, "duplicate_external_id");
    }

    #[test]
    fn test_write_error_entry() {
        let mut stats = SyncStatistics::new();
        stats.record_write_error("u9", &StoreError::conflict("duplicate key"));

        assert_eq!(stats.errors[0].external_id.as_deref(), Some("u9"));
        assert_eq!(stats.errors[0].kind, "write_failed");
        assert!(stats.errors[0].message.contains("duplicate key"));
    }

    #[test]
    fn test_should_flush() {
        let mut stats = SyncStatistics::new();
        assert!(!stats.should_flush(2));
        stats.record_seen();
        assert!(!stats.should_flush(2));
        stats.record_seen();
        assert!(stats.should_flush(2));
        assert!(!stats.should_flush(0));
    }
}
