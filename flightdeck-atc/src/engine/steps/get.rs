//! Get: fetch a version of a resource into a working volume
//!
//! The fetch lands in a cache volume keyed by `(type, version, source_hash,
//! params_hash)`. When an initialized cache already exists the fetch is
//! skipped entirely and the cache is mounted as the step's artifact; the
//! cache only becomes initialized when a fetch completes successfully.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use flightdeck_core::domain::container::{ContainerIdentifier, StepType};
use flightdeck_core::plan::{GetPlan, PlanId};
use flightdeck_worker::GetRequest;

use crate::engine::repository::ArtifactSource;
use crate::repository::volume as volume_repository;
use crate::worker_pool::CacheIdentifier;

use super::{Step, StepCtx, StepError, StepResult, origin};

/// Worker-side TTL refreshed onto caches a build mounts.
const CACHE_REFRESH_TTL_SECONDS: i64 = 24 * 60 * 60;

pub struct GetStep {
    plan_id: PlanId,
    plan: GetPlan,
    ctx: StepCtx,
}

impl GetStep {
    pub fn new(plan_id: PlanId, plan: GetPlan, ctx: StepCtx) -> Self {
        Self { plan_id, plan, ctx }
    }

    fn identifier(&self) -> ContainerIdentifier {
        ContainerIdentifier::Step {
            build_id: self.ctx.build.build_id,
            plan_id: self.plan_id.clone(),
            step_type: StepType::Get,
            step_name: self.plan.name.clone(),
        }
    }
}

#[async_trait]
impl Step for GetStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let origin = origin(&self.plan_id, &self.plan.name);
        self.ctx.delegate.initialize(&origin).await?;

        let version = self.plan.version.clone().ok_or_else(|| {
            StepError::InvalidPlan(format!("get step {:?} has no version", self.plan.name))
        })?;

        let cache = CacheIdentifier::new(
            &self.plan.resource_type,
            &version,
            &self.plan.source,
            &self.plan.params,
        );

        let (tracked, volume) = self
            .ctx
            .tracker
            .init_with_cache(
                self.identifier(),
                &self.plan.tags,
                self.ctx.build.env(),
                &cache,
            )
            .await?;

        let artifact = ArtifactSource {
            worker_name: tracked.worker.name.clone(),
            worker_addr: tracked.worker.addr.clone(),
            volumes_addr: tracked.worker.volumes_addr.clone(),
            volume_handle: volume.handle.clone(),
        };

        if volume.initialized {
            debug!(step = %self.plan.name, volume = %volume.handle, "cache hit; skipping fetch");

            volume_repository::refresh_ttl(&self.ctx.pool, &volume.handle, CACHE_REFRESH_TTL_SECONDS)
                .await?;
            if let Some(volumes_addr) = tracked.worker.volumes_addr.as_deref() {
                self.ctx
                    .workers
                    .host()
                    .set_volume_ttl(volumes_addr, &volume.handle, CACHE_REFRESH_TTL_SECONDS)
                    .await?;
            }

            self.ctx.repo.register(&self.plan.name, artifact);
            self.ctx.delegate.finish(&origin, 0).await?;
            return Ok(StepResult::success());
        }

        self.ctx.delegate.start(&origin).await?;

        let request = GetRequest {
            source: self.plan.source.clone(),
            params: self.plan.params.clone(),
            version,
        };

        let host = self.ctx.workers.host().clone();
        let response = tokio::select! {
            response = host.run_get(&tracked.worker.addr, &tracked.container.handle, request) => {
                response?
            }
            _ = abort.cancelled() => {
                return Ok(StepResult::aborted());
            }
        };

        for line in &response.output {
            self.ctx.delegate.log(&origin, line).await?;
        }

        if response.succeeded() {
            self.ctx
                .tracker
                .initialize_cache(&tracked.worker, &volume)
                .await?;
            self.ctx.repo.register(&self.plan.name, artifact);
        }

        self.ctx.delegate.finish(&origin, response.exit_status).await?;

        Ok(StepResult {
            succeeded: response.succeeded(),
            aborted: false,
        })
    }
}
