//! Build DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::{Build, BuildStatus};

/// Build summary for listing and status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub id: Uuid,
    pub pipeline_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub name: String,
    pub status: BuildStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub manually_triggered: bool,
}

impl From<Build> for BuildSummary {
    fn from(build: Build) -> Self {
        Self {
            id: build.id,
            pipeline_id: build.pipeline_id,
            job_id: build.job_id,
            name: build.name,
            status: build.status,
            start_time: build.start_time,
            end_time: build.end_time,
            manually_triggered: build.manually_triggered,
        }
    }
}

/// Request to run a one-off build: an orphan plan with no owning job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteBuildRequest {
    pub plan: crate::plan::Plan,
}

/// Query for tailing a build's event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsQuery {
    /// Replay events with `event_id` greater than this.
    #[serde(default)]
    pub from: i64,
}
