//! Container domain types
//!
//! The identity tuple is what container-reuse lookups key on: a resumed step
//! finds its still-running container instead of creating a new one, and a
//! resource check reuses the long-lived check container for that resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::PlanId;

/// What kind of process a container runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Check,
    Get,
    Put,
    Task,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepType::Check => "check",
            StepType::Get => "get",
            StepType::Put => "put",
            StepType::Task => "task",
        };
        write!(f, "{}", s)
    }
}

/// The lookup key for container reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContainerIdentifier {
    /// A build step's container: stable across resumes of the same build.
    Step {
        build_id: Uuid,
        plan_id: PlanId,
        step_type: StepType,
        step_name: String,
    },
    /// A resource check container: one per resource per pipeline.
    Check {
        pipeline_id: Uuid,
        resource_id: Uuid,
    },
}

/// A container the control plane knows about on some worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub handle: String,
    pub worker_name: String,
    pub identifier: ContainerIdentifier,
    pub working_directory: String,
    pub ttl_seconds: Option<i64>,
    pub best_if_used_by: Option<DateTime<Utc>>,
}
