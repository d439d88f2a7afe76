//! Lost-and-found
//!
//! Computes the set of containers and volumes worth keeping (check
//! containers of resources still in a pipeline config, step containers of
//! in-flight builds and of finished builds still inside their retention
//! window, caches of current latest versions, and anything young enough to
//! be in its grace period), then expires everything else by zeroing its
//! worker-side TTL. Actual deletion is the worker's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use flightdeck_core::domain::build::BuildStatus;
use flightdeck_core::domain::container::{Container, ContainerIdentifier};
use flightdeck_core::domain::volume::{Volume, VolumeIdentifier};

use crate::app::App;
use crate::repository::{
    build as build_repository, container as container_repository,
    pipeline as pipeline_repository, resource as resource_repository,
    version as version_repository, volume as volume_repository, worker as worker_repository,
};

use super::lease_runner::Collector;

pub struct BaggageCollector {
    app: Arc<App>,
}

impl BaggageCollector {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }
}

/// Everything `plan_expirations` needs to know about the world.
pub struct Snapshot {
    pub now: DateTime<Utc>,
    pub grace: Duration,
    pub retention_success: Duration,
    pub retention_failure: Duration,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub volume_created_at: HashMap<String, DateTime<Utc>>,
    /// Resources present in some pipeline's current config.
    pub current_resources: HashSet<Uuid>,
    /// `(resource_type, canonical version json)` of each current resource's
    /// latest version.
    pub latest_caches: HashSet<(String, String)>,
    pub builds: HashMap<Uuid, BuildFacts>,
}

pub struct BuildFacts {
    pub in_flight: bool,
    pub status: BuildStatus,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, PartialEq)]
pub struct Expirations {
    pub containers: Vec<String>,
    pub volumes: Vec<String>,
}

/// Pure keep/expire decision over a snapshot.
pub fn plan_expirations(snapshot: &Snapshot) -> Expirations {
    let mut expirations = Expirations::default();

    for container in &snapshot.containers {
        if !keep_container(snapshot, container) {
            expirations.containers.push(container.handle.clone());
        }
    }

    for volume in &snapshot.volumes {
        if !keep_volume(snapshot, volume) {
            expirations.volumes.push(volume.handle.clone());
        }
    }

    expirations
}

fn keep_container(snapshot: &Snapshot, container: &Container) -> bool {
    match &container.identifier {
        ContainerIdentifier::Check { resource_id, .. } => {
            snapshot.current_resources.contains(resource_id)
        }
        ContainerIdentifier::Step { build_id, .. } => {
            let Some(build) = snapshot.builds.get(build_id) else {
                return false;
            };

            if build.in_flight {
                return true;
            }

            let retention = match build.status {
                BuildStatus::Succeeded => snapshot.retention_success,
                _ => snapshot.retention_failure,
            };

            match build.end_time {
                Some(end_time) => {
                    snapshot.now.signed_duration_since(end_time).num_seconds()
                        < retention.as_secs() as i64
                }
                None => false,
            }
        }
    }
}

fn keep_volume(snapshot: &Snapshot, volume: &Volume) -> bool {
    match &volume.identifier {
        VolumeIdentifier::ResourceCache {
            resource_type,
            version,
            ..
        } => {
            let key = (
                resource_type.clone(),
                serde_json::to_string(version).unwrap_or_default(),
            );
            if snapshot.latest_caches.contains(&key) {
                return true;
            }

            within_grace(snapshot, &volume.handle)
        }
        VolumeIdentifier::Output { name } => {
            // Scoped names lead with the owning build id.
            name.split(':')
                .next()
                .and_then(|raw| Uuid::parse_str(raw).ok())
                .and_then(|build_id| snapshot.builds.get(&build_id))
                .map(|build| build.in_flight)
                .unwrap_or(false)
                || within_grace(snapshot, &volume.handle)
        }
        VolumeIdentifier::CopyOnWrite { .. } | VolumeIdentifier::Import { .. } => {
            within_grace(snapshot, &volume.handle)
        }
    }
}

fn within_grace(snapshot: &Snapshot, handle: &str) -> bool {
    match snapshot.volume_created_at.get(handle) {
        Some(created_at) => {
            snapshot.now.signed_duration_since(*created_at).num_seconds()
                < snapshot.grace.as_secs() as i64
        }
        None => false,
    }
}

#[async_trait]
impl Collector for BaggageCollector {
    async fn collect(&self) -> anyhow::Result<()> {
        let pool = &self.app.pool;

        let mut current_resources = HashSet::new();
        let mut latest_caches = HashSet::new();

        for pipeline in pipeline_repository::list_all(pool).await? {
            for resource in resource_repository::list_for_pipeline(pool, pipeline.id).await? {
                current_resources.insert(resource.id);

                if let Some(latest) = version_repository::latest(pool, resource.id).await? {
                    latest_caches.insert((
                        resource.resource_type.clone(),
                        serde_json::to_string(&latest.version).unwrap_or_default(),
                    ));
                }
            }
        }

        let containers = container_repository::list_all(pool).await?;
        let volumes = volume_repository::list_all(pool).await?;
        let volume_created_at: HashMap<_, _> = volume_repository::created_at_map(pool)
            .await?
            .into_iter()
            .collect();

        let mut builds = HashMap::new();
        for container in &containers {
            if let ContainerIdentifier::Step { build_id, .. } = &container.identifier {
                if !builds.contains_key(build_id) {
                    if let Some(build) = build_repository::find_by_id(pool, *build_id).await? {
                        builds.insert(
                            *build_id,
                            BuildFacts {
                                in_flight: build.status.is_in_flight(),
                                status: build.status,
                                end_time: build.end_time,
                            },
                        );
                    }
                }
            }
        }
        for volume in &volumes {
            if let VolumeIdentifier::Output { name } = &volume.identifier {
                let Some(build_id) = name.split(':').next().and_then(|raw| Uuid::parse_str(raw).ok())
                else {
                    continue;
                };
                if !builds.contains_key(&build_id) {
                    if let Some(build) = build_repository::find_by_id(pool, build_id).await? {
                        builds.insert(
                            build_id,
                            BuildFacts {
                                in_flight: build.status.is_in_flight(),
                                status: build.status,
                                end_time: build.end_time,
                            },
                        );
                    }
                }
            }
        }

        let snapshot = Snapshot {
            now: Utc::now(),
            grace: self.app.settings.old_resource_grace_period,
            retention_success: self.app.settings.container_retention_success_duration,
            retention_failure: self.app.settings.container_retention_failure_duration,
            containers,
            volumes,
            volume_created_at,
            current_resources,
            latest_caches,
            builds,
        };

        let expirations = plan_expirations(&snapshot);

        if expirations.containers.is_empty() && expirations.volumes.is_empty() {
            return Ok(());
        }

        info!(
            containers = expirations.containers.len(),
            volumes = expirations.volumes.len(),
            "expiring orphaned state"
        );

        let workers: HashMap<String, _> = worker_repository::list_all(pool)
            .await?
            .into_iter()
            .map(|w| (w.name.clone(), w))
            .collect();

        let host = self.app.workers.host();

        for container in &snapshot.containers {
            if !expirations.containers.contains(&container.handle) {
                continue;
            }

            if let Some(worker) = workers.get(&container.worker_name) {
                if let Err(e) = host.set_container_ttl(&worker.addr, &container.handle, 0).await {
                    warn!(handle = %container.handle, "failed to expire container: {}", e);
                    continue;
                }
            }
            container_repository::mark_expired(pool, &container.handle).await?;
        }

        for volume in &snapshot.volumes {
            if !expirations.volumes.contains(&volume.handle) {
                continue;
            }

            let volumes_addr = workers
                .get(&volume.worker_name)
                .and_then(|w| w.volumes_addr.clone());

            if let Some(volumes_addr) = volumes_addr {
                if let Err(e) = host.set_volume_ttl(&volumes_addr, &volume.handle, 0).await {
                    warn!(handle = %volume.handle, "failed to expire volume: {}", e);
                    continue;
                }
            }
            volume_repository::mark_expired(pool, &volume.handle).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::domain::container::StepType;
    use flightdeck_core::domain::version::version;

    fn snapshot() -> Snapshot {
        Snapshot {
            now: Utc::now(),
            grace: Duration::from_secs(300),
            retention_success: Duration::from_secs(300),
            retention_failure: Duration::from_secs(3600),
            containers: vec![],
            volumes: vec![],
            volume_created_at: HashMap::new(),
            current_resources: HashSet::new(),
            latest_caches: HashSet::new(),
            builds: HashMap::new(),
        }
    }

    fn check_container(resource_id: Uuid) -> Container {
        Container {
            handle: format!("check-{}", resource_id),
            worker_name: "w1".to_string(),
            identifier: ContainerIdentifier::Check {
                pipeline_id: Uuid::new_v4(),
                resource_id,
            },
            working_directory: String::new(),
            ttl_seconds: None,
            best_if_used_by: None,
        }
    }

    fn step_container(build_id: Uuid) -> Container {
        Container {
            handle: format!("step-{}", build_id),
            worker_name: "w1".to_string(),
            identifier: ContainerIdentifier::Step {
                build_id,
                plan_id: "0".to_string(),
                step_type: StepType::Task,
                step_name: "unit".to_string(),
            },
            working_directory: String::new(),
            ttl_seconds: None,
            best_if_used_by: None,
        }
    }

    fn cache_volume(handle: &str, resource_type: &str, v: &[(&str, &str)]) -> Volume {
        Volume {
            handle: handle.to_string(),
            worker_name: "w1".to_string(),
            identifier: VolumeIdentifier::ResourceCache {
                resource_type: resource_type.to_string(),
                version: version(v),
                source_hash: "s".to_string(),
                params_hash: "p".to_string(),
            },
            ttl_seconds: None,
            size_in_bytes: None,
            initialized: true,
        }
    }

    #[test]
    fn test_check_container_of_current_resource_is_kept() {
        let resource_id = Uuid::new_v4();
        let mut snap = snapshot();
        snap.current_resources.insert(resource_id);
        snap.containers = vec![check_container(resource_id), check_container(Uuid::new_v4())];

        let expirations = plan_expirations(&snap);
        assert_eq!(expirations.containers, vec![snap.containers[1].handle.clone()]);
    }

    #[test]
    fn test_in_flight_build_containers_are_kept() {
        let live = Uuid::new_v4();
        let dead = Uuid::new_v4();

        let mut snap = snapshot();
        snap.containers = vec![step_container(live), step_container(dead)];
        snap.builds.insert(
            live,
            BuildFacts {
                in_flight: true,
                status: BuildStatus::Started,
                end_time: None,
            },
        );
        snap.builds.insert(
            dead,
            BuildFacts {
                in_flight: false,
                status: BuildStatus::Failed,
                end_time: Some(snap.now - chrono::Duration::hours(24)),
            },
        );

        let expirations = plan_expirations(&snap);
        assert_eq!(expirations.containers, vec![format!("step-{}", dead)]);
    }

    #[test]
    fn test_finished_build_containers_respect_retention_windows() {
        let fresh_success = Uuid::new_v4();
        let stale_success = Uuid::new_v4();

        let mut snap = snapshot();
        snap.containers = vec![step_container(fresh_success), step_container(stale_success)];
        snap.builds.insert(
            fresh_success,
            BuildFacts {
                in_flight: false,
                status: BuildStatus::Succeeded,
                end_time: Some(snap.now - chrono::Duration::seconds(60)),
            },
        );
        snap.builds.insert(
            stale_success,
            BuildFacts {
                in_flight: false,
                status: BuildStatus::Succeeded,
                end_time: Some(snap.now - chrono::Duration::seconds(600)),
            },
        );

        let expirations = plan_expirations(&snap);
        assert_eq!(expirations.containers, vec![format!("step-{}", stale_success)]);
    }

    #[test]
    fn test_latest_cache_is_kept_and_old_cache_expires_after_grace() {
        let mut snap = snapshot();
        snap.latest_caches
            .insert(("git".to_string(), serde_json::to_string(&version(&[("ref", "new")])).unwrap()));

        snap.volumes = vec![
            cache_volume("latest", "git", &[("ref", "new")]),
            cache_volume("old-in-grace", "git", &[("ref", "old")]),
            cache_volume("old-stale", "git", &[("ref", "older")]),
        ];
        snap.volume_created_at
            .insert("old-in-grace".to_string(), snap.now - chrono::Duration::seconds(60));
        snap.volume_created_at
            .insert("old-stale".to_string(), snap.now - chrono::Duration::seconds(900));

        let expirations = plan_expirations(&snap);
        assert_eq!(expirations.volumes, vec!["old-stale".to_string()]);
    }

    #[test]
    fn test_output_volume_of_in_flight_build_is_kept() {
        let live = Uuid::new_v4();

        let mut snap = snapshot();
        snap.builds.insert(
            live,
            BuildFacts {
                in_flight: true,
                status: BuildStatus::Started,
                end_time: None,
            },
        );
        snap.volumes = vec![Volume {
            handle: "out".to_string(),
            worker_name: "w1".to_string(),
            identifier: VolumeIdentifier::Output {
                name: format!("{}:3:artifacts", live),
            },
            ttl_seconds: None,
            size_in_bytes: None,
            initialized: true,
        }];

        let expirations = plan_expirations(&snap);
        assert!(expirations.volumes.is_empty());
    }
}
