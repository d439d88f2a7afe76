//! Resource tracker
//!
//! Find-before-create container initialization for resource operations, with
//! and without cache volumes. The cache fingerprint is
//! `(resource_type, version, source_hash, params_hash)`; gets that complete
//! successfully mark their cache initialized, and only initialized caches are
//! reused.

use flightdeck_core::domain::container::{Container, ContainerIdentifier};
use flightdeck_core::domain::version::Version;
use flightdeck_core::domain::volume::{Volume, VolumeIdentifier};
use flightdeck_core::domain::worker::Worker;
use flightdeck_worker::{ContainerSpec, MountSpec, RootFs, VolumeSpec, VolumeStrategy};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::repository::volume as volume_repository;
use crate::worker_pool::pool::{PoolError, WorkerPool, WorkerSpec};

/// Where resource containers mount their working volume.
pub const RESOURCE_WORKING_DIRECTORY: &str = "/tmp/build/get";

/// The worker-side property a successful get stamps on its cache.
const INITIALIZED_PROPERTY: &str = "initialized";

/// Content address of a resource cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheIdentifier {
    pub resource_type: String,
    pub version: Version,
    pub source_hash: String,
    pub params_hash: String,
}

impl CacheIdentifier {
    pub fn new(
        resource_type: &str,
        version: &Version,
        source: &serde_json::Value,
        params: &serde_json::Value,
    ) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            version: version.clone(),
            source_hash: hash_json(source),
            params_hash: hash_json(params),
        }
    }
}

/// A container ready to run a resource operation.
pub struct TrackedResource {
    pub container: Container,
    pub worker: Worker,
    /// Whether the container pre-existed (a resumed step reattaching).
    pub found: bool,
}

pub struct ResourceTracker {
    pool: Arc<WorkerPool>,
}

impl ResourceTracker {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Get a container for the identity, reusing an existing one when the
    /// identity matches (the resume path), creating otherwise.
    pub async fn init(
        &self,
        identifier: ContainerIdentifier,
        resource_type: &str,
        tags: &[String],
        env: Vec<String>,
    ) -> Result<TrackedResource, PoolError> {
        if let Some((container, worker)) =
            self.pool.find_container_for_identifier(&identifier).await?
        {
            self.pool.heartbeat_container(&worker, &container.handle).await?;
            return Ok(TrackedResource {
                container,
                worker,
                found: true,
            });
        }

        let worker = self
            .pool
            .select_worker(&WorkerSpec {
                resource_type: Some(resource_type.to_string()),
                tags: tags.to_vec(),
                ..Default::default()
            })
            .await?;

        let container = self
            .pool
            .create_container(
                &worker,
                identifier,
                ContainerSpec {
                    handle: String::new(),
                    root: RootFs::ResourceType {
                        name: resource_type.to_string(),
                    },
                    env,
                    working_directory: RESOURCE_WORKING_DIRECTORY.to_string(),
                    mounts: vec![],
                    ttl_seconds: None,
                },
            )
            .await?;

        Ok(TrackedResource {
            container,
            worker,
            found: false,
        })
    }

    /// Like `init`, but with a cache volume mounted at the working directory.
    /// Placement prefers the worker already holding an initialized cache for
    /// the fingerprint; absent one, a fresh uninitialized volume is created on
    /// the selected worker.
    pub async fn init_with_cache(
        &self,
        identifier: ContainerIdentifier,
        tags: &[String],
        env: Vec<String>,
        cache: &CacheIdentifier,
    ) -> Result<(TrackedResource, Volume), PoolError> {
        let db = self.pool.db();

        if let Some((container, worker)) =
            self.pool.find_container_for_identifier(&identifier).await?
        {
            self.pool.heartbeat_container(&worker, &container.handle).await?;

            let volume = self.find_or_create_cache_on(&worker, cache).await?;
            return Ok((
                TrackedResource {
                    container,
                    worker,
                    found: true,
                },
                volume,
            ));
        }

        // Steer selection towards a worker that already has the cache.
        let existing = volume_repository::find_caches(
            db,
            &cache.resource_type,
            &cache.version,
            &cache.source_hash,
            &cache.params_hash,
        )
        .await?;

        let worker = self
            .pool
            .select_worker(&WorkerSpec {
                resource_type: Some(cache.resource_type.clone()),
                tags: tags.to_vec(),
                mounts: existing
                    .iter()
                    .filter(|v| v.initialized)
                    .map(|v| v.handle.clone())
                    .collect(),
                ..Default::default()
            })
            .await?;

        let volume = self.find_or_create_cache_on(&worker, cache).await?;

        let container = self
            .pool
            .create_container(
                &worker,
                identifier,
                ContainerSpec {
                    handle: String::new(),
                    root: RootFs::ResourceType {
                        name: cache.resource_type.clone(),
                    },
                    env,
                    working_directory: RESOURCE_WORKING_DIRECTORY.to_string(),
                    mounts: vec![MountSpec {
                        volume_handle: volume.handle.clone(),
                        mount_path: RESOURCE_WORKING_DIRECTORY.to_string(),
                    }],
                    ttl_seconds: None,
                },
            )
            .await?;

        Ok((
            TrackedResource {
                container,
                worker,
                found: false,
            },
            volume,
        ))
    }

    /// Mark a cache trustworthy after a successful get, both in the database
    /// and as a worker-side property.
    pub async fn initialize_cache(&self, worker: &Worker, volume: &Volume) -> Result<(), PoolError> {
        if let Some(volumes_addr) = worker.volumes_addr.as_deref() {
            self.pool
                .host()
                .set_volume_property(volumes_addr, &volume.handle, INITIALIZED_PROPERTY, "yep")
                .await?;
        }

        volume_repository::set_initialized(self.pool.db(), &volume.handle).await?;

        Ok(())
    }

    async fn find_or_create_cache_on(
        &self,
        worker: &Worker,
        cache: &CacheIdentifier,
    ) -> Result<Volume, PoolError> {
        let db = self.pool.db();

        if let Some(volume) = volume_repository::find_cache_on_worker(
            db,
            &worker.name,
            &cache.resource_type,
            &cache.version,
            &cache.source_hash,
            &cache.params_hash,
        )
        .await?
        {
            debug!(handle = %volume.handle, worker = %worker.name,
                initialized = volume.initialized, "found cache volume");
            return Ok(volume);
        }

        let volumes_addr = worker
            .volumes_addr
            .as_deref()
            .ok_or_else(|| PoolError::NoVolumeManager(worker.name.clone()))?;

        let handle = Uuid::new_v4().to_string();

        let mut properties = HashMap::new();
        properties.insert("resource_type".to_string(), cache.resource_type.clone());
        properties.insert("source_hash".to_string(), cache.source_hash.clone());
        properties.insert("params_hash".to_string(), cache.params_hash.clone());

        self.pool
            .host()
            .create_volume(
                volumes_addr,
                VolumeSpec {
                    handle: handle.clone(),
                    strategy: VolumeStrategy::Empty,
                    properties,
                    ttl_seconds: None,
                },
            )
            .await?;

        let volume = Volume {
            handle,
            worker_name: worker.name.clone(),
            identifier: VolumeIdentifier::ResourceCache {
                resource_type: cache.resource_type.clone(),
                version: cache.version.clone(),
                source_hash: cache.source_hash.clone(),
                params_hash: cache.params_hash.clone(),
            },
            ttl_seconds: None,
            size_in_bytes: None,
            initialized: false,
        };

        volume_repository::insert(db, &volume).await?;

        debug!(handle = %volume.handle, worker = %worker.name, "created cache volume");

        Ok(volume)
    }
}

/// Canonical content hash of an opaque JSON bundle. `Version` keys are sorted
/// by construction and serde_json keeps map order stable, so equal bundles
/// hash equal.
fn hash_json(value: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::domain::version::version;

    #[test]
    fn test_cache_identifier_hashes_are_stable() {
        let source = serde_json::json!({"uri": "https://example.com", "branch": "main"});
        let params = serde_json::json!({"depth": 1});
        let v = version(&[("ref", "abc")]);

        let a = CacheIdentifier::new("git", &v, &source, &params);
        let b = CacheIdentifier::new("git", &v, &source, &params);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_identifier_differs_by_source() {
        let v = version(&[("ref", "abc")]);
        let params = serde_json::Value::Null;

        let a = CacheIdentifier::new("git", &v, &serde_json::json!({"uri": "a"}), &params);
        let b = CacheIdentifier::new("git", &v, &serde_json::json!({"uri": "b"}), &params);
        assert_eq!(a.params_hash, b.params_hash);
        assert_ne!(a.source_hash, b.source_hash);
    }
}
