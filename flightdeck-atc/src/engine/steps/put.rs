//! Put: publish through a resource, recording the produced version
//!
//! Every artifact the build has produced so far is mounted into the put
//! container, since the `out` script may reference any of them. The version
//! the script reports is persisted as a versioned resource and a build
//! output, and handed to the implicit dependent get that follows.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use flightdeck_core::domain::container::{Container, ContainerIdentifier, StepType};
use flightdeck_core::domain::worker::Worker;
use flightdeck_core::plan::{PlanId, PutPlan};
use flightdeck_worker::{ContainerSpec, MountSpec, PutRequest, RootFs};

use crate::repository::{build as build_repository, resource as resource_repository, version as version_repository};
use crate::worker_pool::WorkerSpec;
use crate::worker_pool::resource_tracker::RESOURCE_WORKING_DIRECTORY;

use super::{Step, StepCtx, StepError, StepResult, origin};

const PUT_ARTIFACTS_ROOT: &str = "/tmp/build/put";

pub struct PutStep {
    plan_id: PlanId,
    plan: PutPlan,
    ctx: StepCtx,
}

impl PutStep {
    pub fn new(plan_id: PlanId, plan: PutPlan, ctx: StepCtx) -> Self {
        Self { plan_id, plan, ctx }
    }

    fn identifier(&self) -> ContainerIdentifier {
        ContainerIdentifier::Step {
            build_id: self.ctx.build.build_id,
            plan_id: self.plan_id.clone(),
            step_type: StepType::Put,
            step_name: self.plan.name.clone(),
        }
    }

    /// Find the step's container from a previous attempt, or place a new one
    /// with every artifact mounted.
    async fn find_or_create_container(&self) -> Result<(Container, Worker), StepError> {
        if let Some(found) = self
            .ctx
            .workers
            .find_container_for_identifier(&self.identifier())
            .await?
        {
            return Ok(found);
        }

        let artifacts = self.ctx.repo.all();

        let worker = self
            .ctx
            .workers
            .select_worker(&WorkerSpec {
                resource_type: Some(self.plan.resource_type.clone()),
                tags: self.plan.tags.clone(),
                mounts: artifacts
                    .iter()
                    .map(|(_, source)| source.volume_handle.clone())
                    .collect(),
                ..Default::default()
            })
            .await?;

        let mounts = artifacts
            .iter()
            .map(|(name, source)| MountSpec {
                volume_handle: source.volume_handle.clone(),
                mount_path: format!("{}/{}", PUT_ARTIFACTS_ROOT, name),
            })
            .collect();

        let container = self
            .ctx
            .workers
            .create_container(
                &worker,
                self.identifier(),
                ContainerSpec {
                    handle: String::new(),
                    root: RootFs::ResourceType {
                        name: self.plan.resource_type.clone(),
                    },
                    env: self.ctx.build.env(),
                    working_directory: RESOURCE_WORKING_DIRECTORY.to_string(),
                    mounts,
                    ttl_seconds: None,
                },
            )
            .await?;

        Ok((container, worker))
    }

    /// Persist the produced version and the build-output edge.
    async fn record_output(
        &self,
        version: &flightdeck_core::domain::version::Version,
        metadata: &[flightdeck_core::domain::version::MetadataField],
    ) -> Result<(), StepError> {
        let Some(pipeline_id) = self.ctx.build.pipeline_id else {
            return Ok(());
        };

        let Some(resource) =
            resource_repository::find_by_name(&self.ctx.pool, pipeline_id, &self.plan.resource)
                .await?
        else {
            return Ok(());
        };

        version_repository::save_versions(&self.ctx.pool, resource.id, &[version.clone()]).await?;

        if let Some(saved) =
            version_repository::find_by_version(&self.ctx.pool, resource.id, version).await?
        {
            version_repository::save_metadata(&self.ctx.pool, saved.id, metadata).await?;
            build_repository::save_output(
                &self.ctx.pool,
                self.ctx.build.build_id,
                saved.id,
                &self.plan.resource,
            )
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Step for PutStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let origin = origin(&self.plan_id, &self.plan.name);
        self.ctx.delegate.initialize(&origin).await?;

        let (container, worker) = self.find_or_create_container().await?;

        self.ctx.delegate.start(&origin).await?;

        let artifacts: HashMap<String, String> = self
            .ctx
            .repo
            .all()
            .into_iter()
            .map(|(name, _)| {
                let path = format!("{}/{}", PUT_ARTIFACTS_ROOT, name);
                (name, path)
            })
            .collect();

        let request = PutRequest {
            source: self.plan.source.clone(),
            params: self.plan.params.clone(),
            artifacts,
        };

        let host = self.ctx.workers.host().clone();
        let response = tokio::select! {
            response = host.run_put(&worker.addr, &container.handle, request) => response?,
            _ = abort.cancelled() => return Ok(StepResult::aborted()),
        };

        for line in &response.output {
            self.ctx.delegate.log(&origin, line).await?;
        }

        if response.succeeded() {
            if let Some(result) = response.version_result() {
                self.record_output(&result.version, &result.metadata).await?;
                self.ctx
                    .put_versions
                    .lock()
                    .await
                    .insert(self.plan.resource.clone(), result);
            }
        }

        self.ctx.delegate.finish(&origin, response.exit_status).await?;

        Ok(StepResult {
            succeeded: response.succeeded(),
            aborted: false,
        })
    }
}
