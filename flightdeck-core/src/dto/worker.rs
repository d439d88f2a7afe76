//! Worker DTOs

use serde::{Deserialize, Serialize};

use crate::domain::worker::WorkerResourceType;

/// Worker registration, sent on startup and refreshed by heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub name: String,
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes_addr: Option<String>,
    pub platform: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub resource_types: Vec<WorkerResourceType>,
    #[serde(default)]
    pub active_containers: i32,
}

/// Heartbeat payload; refreshes liveness and the container count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub active_containers: i32,
}
