//! Build engine
//!
//! Translates a persisted plan into a running step tree and drives it to a
//! terminal status. A build created here and a build rehydrated from
//! `engine_metadata` after a restart behave identically: step identity is
//! derived from `(build_id, plan_id, step_type, step_name)`, so reattach
//! finds the containers the first attempt left behind.

pub mod delegate;
pub mod repository;
pub mod steps;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flightdeck_core::domain::build::{Build, BuildStatus};
use flightdeck_core::plan::Plan;

use crate::repository::{job as job_repository, pipeline as pipeline_repository};
use crate::worker_pool::{ResourceTracker, WorkerPool};
use delegate::BuildDelegate;
use repository::ArtifactRepository;
use steps::{StepCtx, build_step};

/// Engine schema name persisted on builds; a build written by an engine this
/// node doesn't know cannot be resumed here.
pub const ENGINE_NAME: &str = "exec.v2";

/// The serialized form of `engine_metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExecMetadata {
    plan: Plan,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("build has no engine metadata")]
    MissingMetadata,
    #[error("invalid engine metadata: {0}")]
    InvalidMetadata(#[from] serde_json::Error),
    #[error("unknown engine {0:?}")]
    UnknownEngine(String),
}

pub struct Engine {
    pool: PgPool,
    workers: Arc<WorkerPool>,
    tracker: Arc<ResourceTracker>,
    external_url: String,
}

impl Engine {
    pub fn new(
        pool: PgPool,
        workers: Arc<WorkerPool>,
        tracker: Arc<ResourceTracker>,
        external_url: String,
    ) -> Self {
        Self {
            pool,
            workers,
            tracker,
            external_url,
        }
    }

    /// Serialize a plan into the metadata persisted on the build row.
    pub fn metadata_for_plan(plan: &Plan) -> String {
        serde_json::to_string(&ExecMetadata { plan: plan.clone() })
            .expect("plan serialization is infallible")
    }

    /// Wrap a freshly created build whose plan is already in hand.
    pub fn create_build(&self, build: Build, plan: Plan) -> EngineBuild {
        self.engine_build(build, plan)
    }

    /// Rehydrate a build from its persisted metadata. A parse failure here is
    /// an invariant violation the caller turns into `errored`.
    pub fn lookup_build(&self, build: Build) -> Result<EngineBuild, EngineError> {
        if build.engine != ENGINE_NAME {
            return Err(EngineError::UnknownEngine(build.engine.clone()));
        }

        let raw = build
            .engine_metadata
            .as_deref()
            .ok_or(EngineError::MissingMetadata)?;

        let metadata: ExecMetadata = serde_json::from_str(raw)?;

        Ok(self.engine_build(build, metadata.plan))
    }

    fn engine_build(&self, build: Build, plan: Plan) -> EngineBuild {
        EngineBuild {
            pool: self.pool.clone(),
            workers: Arc::clone(&self.workers),
            tracker: Arc::clone(&self.tracker),
            external_url: self.external_url.clone(),
            build,
            plan,
        }
    }
}

/// A build bound to this engine, ready to run or resume.
pub struct EngineBuild {
    pool: PgPool,
    workers: Arc<WorkerPool>,
    tracker: Arc<ResourceTracker>,
    external_url: String,
    build: Build,
    plan: Plan,
}

impl EngineBuild {
    pub fn build_id(&self) -> uuid::Uuid {
        self.build.id
    }

    /// Run the step tree to completion and finalize the build. Execution
    /// continues from whatever side effects are already present on workers;
    /// cancelling `abort` propagates through the tree, children first.
    pub async fn resume(self, abort: CancellationToken) {
        let build_id = self.build.id;
        let delegate = Arc::new(BuildDelegate::new(self.pool.clone(), build_id));

        let ctx = StepCtx {
            build: self.build_context().await,
            pool: self.pool.clone(),
            workers: Arc::clone(&self.workers),
            tracker: Arc::clone(&self.tracker),
            delegate: Arc::clone(&delegate),
            repo: Arc::new(ArtifactRepository::new()),
            put_versions: Arc::new(Mutex::new(HashMap::new())),
        };

        info!(build = %build_id, "resuming build");

        let mut root = build_step(&self.plan, &ctx);
        let outcome = root.run(&abort).await;

        let status = match outcome {
            Err(e) => {
                error!(build = %build_id, "build errored: {}", e);
                if let Err(persist) = delegate.error(None, &e.to_string()).await {
                    warn!(build = %build_id, "failed to persist error event: {}", persist);
                }
                BuildStatus::Errored
            }
            Ok(result) if result.aborted || abort.is_cancelled() => BuildStatus::Aborted,
            Ok(result) if result.succeeded => BuildStatus::Succeeded,
            Ok(_) => BuildStatus::Failed,
        };

        if let Err(e) = delegate.finish_build(status).await {
            error!(build = %build_id, "failed to finalize build: {}", e);
        }

        // Dropping the context releases every artifact hold.
        info!(build = %build_id, status = %status, "build finished");
    }

    /// Step metadata exposed to processes as environment, matching what the
    /// build row knows.
    async fn build_context(&self) -> steps::BuildContext {
        let pool = &self.pool;

        let job_name = match self.build.job_id {
            Some(job_id) => job_repository::find_by_id(pool, job_id)
                .await
                .ok()
                .flatten()
                .map(|j| j.name),
            None => None,
        };

        let pipeline_name = match self.build.pipeline_id {
            Some(pipeline_id) => pipeline_repository::find_by_id(pool, pipeline_id)
                .await
                .ok()
                .flatten()
                .map(|p| p.name),
            None => None,
        };

        steps::BuildContext {
            build_id: self.build.id,
            build_name: self.build.name.clone(),
            job_name,
            pipeline_id: self.build.pipeline_id,
            pipeline_name,
            external_url: self.external_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::plan::{PlanOp, TaskConfig, TaskPlan, TaskRunConfig};

    fn sample_plan() -> Plan {
        Plan::new(
            "0",
            PlanOp::Task(TaskPlan {
                name: "unit".to_string(),
                config: TaskConfig {
                    platform: "linux".to_string(),
                    image: "docker:///busybox".to_string(),
                    run: TaskRunConfig {
                        path: "true".to_string(),
                        args: vec![],
                    },
                    inputs: vec![],
                    outputs: vec![],
                    params: HashMap::new(),
                },
                input_mappings: HashMap::new(),
                output_mappings: HashMap::new(),
                tags: vec![],
            }),
        )
    }

    #[test]
    fn test_metadata_round_trips_through_lookup_shape() {
        let plan = sample_plan();
        let raw = Engine::metadata_for_plan(&plan);
        let parsed: ExecMetadata = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.plan, plan);
    }

    #[test]
    fn test_metadata_with_unknown_operator_fails_to_parse() {
        let raw = r#"{"plan": {"id": "0", "parallel": {}}}"#;
        let parsed: Result<ExecMetadata, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }
}
