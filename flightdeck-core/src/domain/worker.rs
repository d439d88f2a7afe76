//! Worker domain types
//!
//! A worker is a remote container host registered with the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered container host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    /// Container API endpoint.
    pub addr: String,
    /// Volume-management API endpoint, if the worker has one.
    pub volumes_addr: Option<String>,
    pub active_containers: i32,
    pub resource_types: Vec<WorkerResourceType>,
    pub platform: String,
    pub tags: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub state: WorkerState,
}

impl Worker {
    /// Whether this worker advertises an image for the given resource type.
    pub fn supports_resource_type(&self, resource_type: &str) -> bool {
        self.resource_types
            .iter()
            .any(|rt| rt.resource_type == resource_type)
    }
}

/// A resource type a worker can run, backed by a container image it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResourceType {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub image: String,
}

/// Worker lifecycle state. Only `running` workers accept new containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    Stalled,
    Landing,
    Landed,
    Retiring,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Running => "running",
            WorkerState::Stalled => "stalled",
            WorkerState::Landing => "landing",
            WorkerState::Landed => "landed",
            WorkerState::Retiring => "retiring",
        };
        write!(f, "{}", s)
    }
}
