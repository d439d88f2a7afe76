//! DependentGet: the get half of a put
//!
//! Identical to a get except the version is not in the plan; it comes from
//! the version the preceding put of the same resource reported during this
//! resume. A dependent get reached without that version is an invariant
//! violation, not a failure.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use flightdeck_core::plan::{DependentGetPlan, GetPlan, PlanId};

use super::get::GetStep;
use super::{Step, StepCtx, StepError, StepResult};

pub struct DependentGetStep {
    plan_id: PlanId,
    plan: DependentGetPlan,
    ctx: StepCtx,
}

impl DependentGetStep {
    pub fn new(plan_id: PlanId, plan: DependentGetPlan, ctx: StepCtx) -> Self {
        Self { plan_id, plan, ctx }
    }
}

#[async_trait]
impl Step for DependentGetStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let version = self
            .ctx
            .put_versions
            .lock()
            .await
            .get(&self.plan.resource)
            .map(|result| result.version.clone())
            .ok_or_else(|| StepError::MissingVersion(self.plan.resource.clone()))?;

        let mut get = GetStep::new(
            self.plan_id.clone(),
            GetPlan {
                name: self.plan.name.clone(),
                resource: self.plan.resource.clone(),
                resource_type: self.plan.resource_type.clone(),
                source: self.plan.source.clone(),
                params: self.plan.params.clone(),
                version: Some(version),
                tags: self.plan.tags.clone(),
            },
            self.ctx.clone(),
        );

        get.run(abort).await
    }
}
