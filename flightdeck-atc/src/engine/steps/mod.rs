//! Step implementations
//!
//! One module per plan operator. Every step yields two distinct signals: a
//! *success* boolean, meaningful only when the step ran to completion, and an
//! *error*, meaning it couldn't execute at all. Composites route on the
//! difference: `on_failure` fires on ran-and-failed, never on errored or
//! aborted; errors short-circuit and bubble to the root.

mod aggregate;
mod dependent_get;
mod ensure;
mod get;
mod on_failure;
mod on_success;
mod put;
mod task;
mod timeout;
mod try_step;

#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use flightdeck_core::domain::event::EventOrigin;
use flightdeck_core::plan::{Plan, PlanOp};
use flightdeck_worker::VersionResult;

use crate::engine::delegate::BuildDelegate;
use crate::engine::repository::ArtifactRepository;
use crate::worker_pool::{PoolError, ResourceTracker, WorkerPool};

/// The outcome of a step that ran (or was stopped) without faulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    pub succeeded: bool,
    pub aborted: bool,
}

impl StepResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            aborted: false,
        }
    }

    pub fn failure() -> Self {
        Self {
            succeeded: false,
            aborted: false,
        }
    }

    pub fn aborted() -> Self {
        Self {
            succeeded: false,
            aborted: true,
        }
    }
}

/// A fault: the step couldn't execute. Distinct from `success=false`.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("worker error: {0}")]
    Worker(#[from] flightdeck_worker::ClientError),
    #[error("placement error: {0}")]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("no artifact named {0:?}")]
    MissingArtifact(String),
    #[error("no version available for dependent get of {0:?}")]
    MissingVersion(String),
}

#[async_trait]
pub trait Step: Send {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError>;
}

/// Build-scoped facts steps expose to their processes as environment.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub build_id: Uuid,
    pub build_name: String,
    pub job_name: Option<String>,
    pub pipeline_id: Option<Uuid>,
    pub pipeline_name: Option<String>,
    pub external_url: String,
}

impl BuildContext {
    pub fn env(&self) -> Vec<String> {
        let mut env = vec![
            format!("BUILD_ID={}", self.build_id),
            format!("BUILD_NAME={}", self.build_name),
            format!("ATC_EXTERNAL_URL={}", self.external_url),
        ];

        if let Some(job_name) = &self.job_name {
            env.push(format!("BUILD_JOB_NAME={}", job_name));
        }
        if let Some(pipeline_name) = &self.pipeline_name {
            env.push(format!("BUILD_PIPELINE_NAME={}", pipeline_name));
        }

        env
    }
}

/// Everything a step needs, shared across the build's whole tree.
#[derive(Clone)]
pub struct StepCtx {
    pub build: BuildContext,
    pub pool: PgPool,
    pub workers: Arc<WorkerPool>,
    pub tracker: Arc<ResourceTracker>,
    pub delegate: Arc<BuildDelegate>,
    pub repo: Arc<ArtifactRepository>,
    /// Versions produced by put steps, consumed by their dependent gets,
    /// keyed by resource name.
    pub put_versions: Arc<Mutex<HashMap<String, VersionResult>>>,
}

/// Construct the runnable tree for a plan. Plan ids flow into step identity,
/// so the same plan always yields the same identities.
pub fn build_step(plan: &Plan, ctx: &StepCtx) -> Box<dyn Step> {
    match &plan.op {
        PlanOp::Aggregate(plans) => Box::new(aggregate::AggregateStep::new(
            plans.iter().map(|p| build_step(p, ctx)).collect(),
        )),
        PlanOp::OnSuccess(hooked) => Box::new(on_success::OnSuccessStep::new(
            build_step(&hooked.step, ctx),
            build_step(&hooked.next, ctx),
        )),
        PlanOp::OnFailure(hooked) => Box::new(on_failure::OnFailureStep::new(
            build_step(&hooked.step, ctx),
            build_step(&hooked.next, ctx),
        )),
        PlanOp::Ensure(hooked) => Box::new(ensure::EnsureStep::new(
            build_step(&hooked.step, ctx),
            build_step(&hooked.next, ctx),
        )),
        PlanOp::Try(inner) => Box::new(try_step::TryStep::new(build_step(inner, ctx))),
        PlanOp::Timeout(t) => Box::new(timeout::TimeoutStep::new(
            build_step(&t.step, ctx),
            t.duration.clone(),
        )),
        PlanOp::Get(get) => Box::new(get::GetStep::new(plan.id.clone(), get.clone(), ctx.clone())),
        PlanOp::Put(put) => Box::new(put::PutStep::new(plan.id.clone(), put.clone(), ctx.clone())),
        PlanOp::DependentGet(dg) => Box::new(dependent_get::DependentGetStep::new(
            plan.id.clone(),
            dg.clone(),
            ctx.clone(),
        )),
        PlanOp::Task(task) => Box::new(task::TaskStep::new(
            plan.id.clone(),
            task.clone(),
            ctx.clone(),
        )),
    }
}

pub(crate) fn origin(plan_id: &str, step_name: &str) -> EventOrigin {
    EventOrigin {
        plan_id: plan_id.to_string(),
        step_name: step_name.to_string(),
    }
}
