//! Worker selection and container placement

use flightdeck_core::domain::container::{Container, ContainerIdentifier};
use flightdeck_core::domain::worker::Worker;
use flightdeck_worker::{ContainerHost, ContainerSpec, MountSpec, VolumeSpec, VolumeStrategy};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::repository::{container as container_repository, volume as volume_repository, worker as worker_repository};

/// What a piece of work needs from a worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerSpec {
    pub platform: Option<String>,
    pub resource_type: Option<String>,
    pub tags: Vec<String>,
    /// Volume handles the container wants mounted; placement prefers workers
    /// already holding them.
    pub mounts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no workers satisfy the spec: {0}")]
    NoCompatibleWorkers(String),
    #[error("worker {0} has no volume manager")]
    NoVolumeManager(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("worker RPC error: {0}")]
    Worker(#[from] flightdeck_worker::ClientError),
}

pub struct WorkerPool {
    pool: PgPool,
    host: Arc<dyn ContainerHost>,
    default_container_ttl_seconds: i64,
}

impl WorkerPool {
    pub fn new(pool: PgPool, host: Arc<dyn ContainerHost>, default_container_ttl_seconds: i64) -> Self {
        Self {
            pool,
            host,
            default_container_ttl_seconds,
        }
    }

    pub fn host(&self) -> &Arc<dyn ContainerHost> {
        &self.host
    }

    pub fn db(&self) -> &PgPool {
        &self.pool
    }

    /// Pick a worker for the spec, preferring volume locality.
    pub async fn select_worker(&self, spec: &WorkerSpec) -> Result<Worker, PoolError> {
        let workers = worker_repository::list_running(&self.pool).await?;

        let locations = if spec.mounts.is_empty() {
            HashMap::new()
        } else {
            volume_repository::locate(&self.pool, &spec.mounts)
                .await?
                .into_iter()
                .map(|(handle, worker)| (handle, worker))
                .collect()
        };

        select_candidate(&workers, spec, &locations)
            .cloned()
            .ok_or_else(|| PoolError::NoCompatibleWorkers(describe_spec(spec)))
    }

    /// Find an existing container for the identity, verifying it still exists
    /// on its worker. A row whose remote counterpart is gone is dropped so the
    /// caller creates a fresh one.
    pub async fn find_container_for_identifier(
        &self,
        identifier: &ContainerIdentifier,
    ) -> Result<Option<(Container, Worker)>, PoolError> {
        let Some(container) = container_repository::find_for_identifier(&self.pool, identifier).await?
        else {
            return Ok(None);
        };

        let Some(worker) = worker_repository::find_by_name(&self.pool, &container.worker_name).await?
        else {
            container_repository::delete(&self.pool, &container.handle).await?;
            return Ok(None);
        };

        match self.host.lookup_container(&worker.addr, &container.handle).await {
            Ok(Some(_)) => {
                debug!(handle = %container.handle, worker = %worker.name, "reusing container");
                Ok(Some((container, worker)))
            }
            Ok(None) => {
                container_repository::delete(&self.pool, &container.handle).await?;
                Ok(None)
            }
            Err(e) if e.is_retryable() => Err(e.into()),
            Err(e) => {
                debug!(handle = %container.handle, "container lookup failed: {}", e);
                container_repository::delete(&self.pool, &container.handle).await?;
                Ok(None)
            }
        }
    }

    /// Create a container on the worker and record it under the identity.
    pub async fn create_container(
        &self,
        worker: &Worker,
        identifier: ContainerIdentifier,
        mut spec: ContainerSpec,
    ) -> Result<Container, PoolError> {
        spec.handle = new_handle();
        spec.ttl_seconds = Some(self.default_container_ttl_seconds);

        // Mounts that live elsewhere are streamed over as copy-on-write
        // replicas before the container starts.
        spec.mounts = self
            .materialize_mounts(worker, std::mem::take(&mut spec.mounts))
            .await?;

        self.host.create_container(&worker.addr, spec.clone()).await?;

        let container = Container {
            handle: spec.handle.clone(),
            worker_name: worker.name.clone(),
            identifier,
            working_directory: spec.working_directory.clone(),
            ttl_seconds: spec.ttl_seconds,
            best_if_used_by: None,
        };

        container_repository::insert(&self.pool, &container).await?;

        info!(handle = %container.handle, worker = %worker.name, "created container");

        Ok(container)
    }

    /// Keep a container alive while a step uses it.
    pub async fn heartbeat_container(&self, worker: &Worker, handle: &str) -> Result<(), PoolError> {
        self.host
            .set_container_ttl(&worker.addr, handle, self.default_container_ttl_seconds)
            .await?;
        container_repository::refresh_ttl(&self.pool, handle, self.default_container_ttl_seconds)
            .await?;
        Ok(())
    }

    /// Ensure every requested mount is present on `worker`, replicating
    /// remote volumes copy-on-write. Returns the effective mount specs.
    async fn materialize_mounts(
        &self,
        worker: &Worker,
        handles: Vec<MountSpec>,
    ) -> Result<Vec<MountSpec>, PoolError> {
        let mut mounts = Vec::with_capacity(handles.len());

        for mount in handles {
            let Some(volume) = volume_repository::find_by_handle(&self.pool, &mount.volume_handle).await?
            else {
                mounts.push(mount);
                continue;
            };

            if volume.worker_name == worker.name {
                mounts.push(mount);
                continue;
            }

            let replica = self.replicate_volume(worker, &volume.worker_name, &volume.handle).await?;
            mounts.push(MountSpec {
                volume_handle: replica,
                mount_path: mount.mount_path,
            });
        }

        Ok(mounts)
    }

    async fn replicate_volume(
        &self,
        dest: &Worker,
        src_worker_name: &str,
        src_handle: &str,
    ) -> Result<String, PoolError> {
        let src = worker_repository::find_by_name(&self.pool, src_worker_name)
            .await?
            .ok_or_else(|| PoolError::NoCompatibleWorkers(src_worker_name.to_string()))?;

        let src_volumes = src
            .volumes_addr
            .as_deref()
            .ok_or_else(|| PoolError::NoVolumeManager(src.name.clone()))?;
        let dest_volumes = dest
            .volumes_addr
            .as_deref()
            .ok_or_else(|| PoolError::NoVolumeManager(dest.name.clone()))?;

        let replica_handle = new_handle();

        self.host
            .create_volume(
                dest_volumes,
                VolumeSpec {
                    handle: replica_handle.clone(),
                    strategy: VolumeStrategy::Empty,
                    properties: HashMap::new(),
                    ttl_seconds: Some(self.default_container_ttl_seconds),
                },
            )
            .await?;

        self.host
            .stream_volume(src_volumes, src_handle, dest_volumes, &replica_handle)
            .await?;

        volume_repository::insert(
            &self.pool,
            &flightdeck_core::domain::volume::Volume {
                handle: replica_handle.clone(),
                worker_name: dest.name.clone(),
                identifier: flightdeck_core::domain::volume::VolumeIdentifier::CopyOnWrite {
                    parent_handle: src_handle.to_string(),
                },
                ttl_seconds: Some(self.default_container_ttl_seconds),
                size_in_bytes: None,
                initialized: true,
            },
        )
        .await?;

        info!(src = %src_handle, dest = %replica_handle, worker = %dest.name, "replicated volume");

        Ok(replica_handle)
    }
}

/// Pure selection over a snapshot of the fleet: filter by compatibility,
/// prefer the worker holding the most requested mounts, tie-break by lowest
/// active container count, then by name for determinism.
pub fn select_candidate<'a>(
    workers: &'a [Worker],
    spec: &WorkerSpec,
    volume_locations: &HashMap<String, String>,
) -> Option<&'a Worker> {
    workers
        .iter()
        .filter(|w| satisfies(w, spec))
        .max_by(|a, b| {
            let local_a = local_mounts(a, spec, volume_locations);
            let local_b = local_mounts(b, spec, volume_locations);
            local_a
                .cmp(&local_b)
                .then(b.active_containers.cmp(&a.active_containers))
                .then(b.name.cmp(&a.name))
        })
}

fn satisfies(worker: &Worker, spec: &WorkerSpec) -> bool {
    if let Some(platform) = &spec.platform {
        if &worker.platform != platform {
            return false;
        }
    }

    if let Some(resource_type) = &spec.resource_type {
        if !worker.supports_resource_type(resource_type) {
            return false;
        }
    }

    spec.tags.iter().all(|tag| worker.tags.contains(tag))
}

fn local_mounts(worker: &Worker, spec: &WorkerSpec, locations: &HashMap<String, String>) -> usize {
    spec.mounts
        .iter()
        .filter(|handle| locations.get(*handle) == Some(&worker.name))
        .count()
}

fn describe_spec(spec: &WorkerSpec) -> String {
    format!(
        "platform={:?} resource_type={:?} tags={:?}",
        spec.platform, spec.resource_type, spec.tags
    )
}

fn new_handle() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flightdeck_core::domain::worker::{WorkerResourceType, WorkerState};

    fn worker(name: &str, platform: &str, tags: &[&str], active: i32) -> Worker {
        Worker {
            name: name.to_string(),
            addr: format!("http://{}:7777", name),
            volumes_addr: Some(format!("http://{}:7788", name)),
            active_containers: active,
            resource_types: vec![WorkerResourceType {
                resource_type: "git".to_string(),
                image: "/images/git".to_string(),
            }],
            platform: platform.to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            start_time: Utc::now(),
            state: WorkerState::Running,
        }
    }

    #[test]
    fn test_platform_must_match_when_given() {
        let workers = vec![worker("a", "linux", &[], 0), worker("b", "darwin", &[], 0)];
        let spec = WorkerSpec {
            platform: Some("darwin".to_string()),
            ..Default::default()
        };
        let picked = select_candidate(&workers, &spec, &HashMap::new()).unwrap();
        assert_eq!(picked.name, "b");
    }

    #[test]
    fn test_tags_must_be_superset() {
        let workers = vec![
            worker("plain", "linux", &[], 0),
            worker("tagged", "linux", &["gpu", "fast"], 5),
        ];
        let spec = WorkerSpec {
            tags: vec!["gpu".to_string()],
            ..Default::default()
        };
        let picked = select_candidate(&workers, &spec, &HashMap::new()).unwrap();
        assert_eq!(picked.name, "tagged");
    }

    #[test]
    fn test_resource_type_capability_filters() {
        let mut no_git = worker("no-git", "linux", &[], 0);
        no_git.resource_types = vec![];
        let workers = vec![no_git, worker("git", "linux", &[], 9)];

        let spec = WorkerSpec {
            resource_type: Some("git".to_string()),
            ..Default::default()
        };
        let picked = select_candidate(&workers, &spec, &HashMap::new()).unwrap();
        assert_eq!(picked.name, "git");
    }

    #[test]
    fn test_prefers_worker_with_most_local_mounts() {
        let workers = vec![worker("near", "linux", &[], 50), worker("far", "linux", &[], 0)];

        let mut locations = HashMap::new();
        locations.insert("vol-1".to_string(), "near".to_string());
        locations.insert("vol-2".to_string(), "near".to_string());

        let spec = WorkerSpec {
            mounts: vec!["vol-1".to_string(), "vol-2".to_string()],
            ..Default::default()
        };

        // Locality beats the active-container tie-break.
        let picked = select_candidate(&workers, &spec, &locations).unwrap();
        assert_eq!(picked.name, "near");
    }

    #[test]
    fn test_ties_break_by_fewest_active_containers() {
        let workers = vec![worker("busy", "linux", &[], 10), worker("idle", "linux", &[], 2)];
        let picked = select_candidate(&workers, &WorkerSpec::default(), &HashMap::new()).unwrap();
        assert_eq!(picked.name, "idle");
    }

    #[test]
    fn test_no_candidates_yields_none() {
        let workers = vec![worker("a", "linux", &[], 0)];
        let spec = WorkerSpec {
            platform: Some("windows".to_string()),
            ..Default::default()
        };
        assert!(select_candidate(&workers, &spec, &HashMap::new()).is_none());
    }
}
