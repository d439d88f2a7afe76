//! Build domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One execution of a job plan (or an orphaned one-off plan).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub pipeline_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    /// Per-job sequence number, assigned from the job's build counter.
    pub name: String,
    pub status: BuildStatus,
    pub engine: String,
    /// Serialized build plan plus engine-specific persistent state.
    pub engine_metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub reap_time: Option<DateTime<Utc>>,
    pub completed: bool,
    pub manually_triggered: bool,
    /// Set when an abort has been requested; the engine's resume loop
    /// observes it and cancels the step tree.
    pub aborted: bool,
    /// Set once the syslog drainer has forwarded this build's log events.
    pub drained: bool,
}

/// Build execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Started,
    Succeeded,
    Failed,
    Errored,
    Aborted,
}

impl BuildStatus {
    /// Terminal statuses end the build's lifecycle; only `reap_time` changes
    /// afterwards.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded
                | BuildStatus::Failed
                | BuildStatus::Errored
                | BuildStatus::Aborted
        )
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, BuildStatus::Pending | BuildStatus::Started)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Started => "started",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
            BuildStatus::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// An input edge: this build consumed this versioned resource under this name.
///
/// Inputs are recorded before the build starts; outputs as `put` steps
/// succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInput {
    pub build_id: Uuid,
    pub versioned_resource_id: i64,
    pub name: String,
}

/// An output edge, recorded when a `put` step succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutput {
    pub build_id: Uuid,
    pub versioned_resource_id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(BuildStatus::Succeeded.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(BuildStatus::Errored.is_terminal());
        assert!(BuildStatus::Aborted.is_terminal());
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(!BuildStatus::Started.is_terminal());
    }

    #[test]
    fn test_in_flight_statuses() {
        assert!(BuildStatus::Pending.is_in_flight());
        assert!(BuildStatus::Started.is_in_flight());
        assert!(!BuildStatus::Aborted.is_in_flight());
    }
}
