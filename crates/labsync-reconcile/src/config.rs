//! Reconciliation configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What happens to the student profiles of a PI whose profile goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentStudentPolicy {
    /// Keep the students, clear their PI reference.
    #[default]
    Detach,
    /// Delete the student profiles and reset those identities to unassigned.
    Remove,
}

impl fmt::Display for DependentStudentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detach => write!(f, "detach"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

impl std::str::FromStr for DependentStudentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "detach" => Ok(Self::Detach),
            "remove" => Ok(Self::Remove),
            _ => Err(format!("Unknown dependent student policy: {s}")),
        }
    }
}

/// Configuration for the sync coordinator and cascade manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// A running run older than this is reclaimed as failed.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Flush counters to the running run every N records.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    #[serde(default)]
    pub dependent_students: DependentStudentPolicy,
    /// Approving a student deletion also deletes the student identity.
    #[serde(default)]
    pub cascade_identity_on_student_delete: bool,
}

fn default_run_timeout_secs() -> u64 {
    3600
}

fn default_progress_every() -> u64 {
    500
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout_secs(),
            progress_every: default_progress_every(),
            dependent_students: DependentStudentPolicy::default(),
            cascade_identity_on_student_delete: false,
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    #[must_use]
    pub fn with_run_timeout_secs(mut self, secs: u64) -> Self {
        self.run_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_dependent_students(mut self, policy: DependentStudentPolicy) -> Self {
        self.dependent_students = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.run_timeout(), Duration::from_secs(3600));
        assert_eq!(config.progress_every, 500);
        assert_eq!(config.dependent_students, DependentStudentPolicy::Detach);
        assert!(!config.cascade_identity_on_student_delete);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ReconcileConfig =
            serde_json::from_str(r#"{"dependent_students": "remove", "run_timeout_secs": 60}"#)
                .unwrap();
        assert_eq!(config.dependent_students, DependentStudentPolicy::Remove);
        assert_eq!(config.run_timeout_secs, 60);
        assert_eq!(config.progress_every, 500);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "Remove".parse::<DependentStudentPolicy>().unwrap(),
            DependentStudentPolicy::Remove
        );
        assert!("orphan".parse::<DependentStudentPolicy>().is_err());
        assert_eq!(DependentStudentPolicy::Detach.to_string(), "detach");
    }
}
