//! The container-host interface and its wire types
//!
//! Everything the control plane asks of a worker goes through
//! [`ContainerHost`]. Process ids are caller-assigned and stable, which is
//! what lets a resumed task step reattach to a process started before a
//! control-plane restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use flightdeck_core::domain::version::{MetadataField, Version};

use crate::error::Result;

/// Operations a container host exposes to the control plane.
#[async_trait]
pub trait ContainerHost: Send + Sync {
    async fn create_container(&self, addr: &str, spec: ContainerSpec) -> Result<()>;
    async fn lookup_container(&self, addr: &str, handle: &str) -> Result<Option<ContainerInfo>>;
    async fn destroy_container(&self, addr: &str, handle: &str) -> Result<()>;
    async fn set_container_ttl(&self, addr: &str, handle: &str, ttl_seconds: i64) -> Result<()>;

    /// Invoke the resource image's `check` entrypoint.
    async fn check(&self, addr: &str, handle: &str, req: CheckRequest) -> Result<CheckResponse>;
    /// Invoke the resource image's `in` entrypoint against the container's
    /// working volume.
    async fn run_get(&self, addr: &str, handle: &str, req: GetRequest) -> Result<ResourceResponse>;
    /// Invoke the resource image's `out` entrypoint.
    async fn run_put(&self, addr: &str, handle: &str, req: PutRequest) -> Result<ResourceResponse>;

    async fn spawn_process(&self, addr: &str, handle: &str, spec: ProcessSpec) -> Result<()>;
    /// Whether a process with this id exists (running or exited) in the
    /// container.
    async fn find_process(&self, addr: &str, handle: &str, process_id: &str) -> Result<bool>;
    /// Long-poll for output and exit status past `cursor`.
    async fn poll_process(
        &self,
        addr: &str,
        handle: &str,
        process_id: &str,
        cursor: u64,
    ) -> Result<ProcessUpdate>;
    async fn stop_process(&self, addr: &str, handle: &str, process_id: &str) -> Result<()>;

    async fn create_volume(&self, volumes_addr: &str, spec: VolumeSpec) -> Result<()>;
    async fn set_volume_ttl(&self, volumes_addr: &str, handle: &str, ttl_seconds: i64)
    -> Result<()>;
    async fn set_volume_property(
        &self,
        volumes_addr: &str,
        handle: &str,
        name: &str,
        value: &str,
    ) -> Result<()>;
    /// Materialize a copy of `src_handle` into `dest_handle` on another
    /// worker.
    async fn stream_volume(
        &self,
        src_volumes_addr: &str,
        src_handle: &str,
        dest_volumes_addr: &str,
        dest_handle: &str,
    ) -> Result<()>;
}

/// What to base a container's root filesystem on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RootFs {
    /// One of the worker's advertised resource-type images.
    ResourceType { name: String },
    /// An arbitrary image reference the worker materializes.
    Image { reference: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Caller-assigned handle; the control plane owns identity.
    pub handle: String,
    pub root: RootFs,
    #[serde(default)]
    pub env: Vec<String>,
    pub working_directory: String,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub volume_handle: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub source: serde_json::Value,
    /// The highest previously-seen version, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Version>,
}

/// Result of a `check`. Versions are ordered as the resource reported them:
/// oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub exit_status: i32,
    #[serde(default)]
    pub versions: Vec<Version>,
    #[serde(default)]
    pub output: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub source: serde_json::Value,
    #[serde(default)]
    pub params: serde_json::Value,
    pub version: Version,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub source: serde_json::Value,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Artifact name -> mount path visible to the `out` script.
    #[serde(default)]
    pub artifacts: HashMap<String, String>,
}

/// Result of a `get` or `put`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub exit_status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
    #[serde(default)]
    pub output: Vec<String>,
}

impl ResourceResponse {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }

    /// The version this operation produced, as a version result.
    pub fn version_result(&self) -> Option<VersionResult> {
        self.version.as_ref().map(|v| VersionResult {
            version: v.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

/// A version plus its display metadata, as produced by get/put operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionResult {
    pub version: Version,
    pub metadata: Vec<MetadataField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Caller-assigned, stable across resumes.
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub dir: String,
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessUpdate {
    #[serde(default)]
    pub logs: Vec<LogLine>,
    pub cursor: u64,
    /// Set once the process has exited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// How a new volume gets its initial content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeStrategy {
    Empty,
    CopyOnWrite { parent_handle: String },
    Import { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Caller-assigned handle.
    pub handle: String,
    pub strategy: VolumeStrategy,
    /// Searchable key/value properties; cache fingerprints live here.
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
}
