//! Build service
//!
//! Manual triggers, aborts, and event tailing. Manual triggers bypass
//! candidate selection and de-duplication (the inputs are simply the latest
//! versions pinning allows) but still respect the job's start gate and
//! pause state.

use std::sync::Arc;
use uuid::Uuid;

use flightdeck_core::config::VersionConstraint;
use flightdeck_core::domain::build::{Build, BuildStatus};
use flightdeck_core::domain::event::BuildEvent;

use crate::app::App;
use crate::engine::delegate::BuildDelegate;
use crate::repository::{
    build as build_repository, event as event_repository, job as job_repository,
    resource as resource_repository, version as version_repository,
};
use crate::scheduler;
use crate::scheduler::planner::ResolvedInput;
use crate::service::pipeline::{self as pipeline_service, PipelineError};

#[derive(Debug)]
pub enum BuildError {
    NotFound(Uuid),
    PipelineNotFound(String),
    JobNotFound(String),
    InvalidState(String),
    NoVersions(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for BuildError {
    fn from(err: sqlx::Error) -> Self {
        BuildError::DatabaseError(err)
    }
}

impl From<PipelineError> for BuildError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(name) => BuildError::PipelineNotFound(name),
            PipelineError::DatabaseError(e) => BuildError::DatabaseError(e),
            other => BuildError::InvalidState(format!("{:?}", other)),
        }
    }
}

/// Manually trigger a build of a job.
pub async fn trigger(
    app: &Arc<App>,
    pipeline_name: &str,
    job_name: &str,
) -> Result<Build, BuildError> {
    let pipeline =
        pipeline_service::get_pipeline(&app.pool, app.team_id, pipeline_name).await?;

    let job_config = pipeline
        .config
        .job(job_name)
        .ok_or_else(|| BuildError::JobNotFound(job_name.to_string()))?;

    let job = job_repository::find_by_name(&app.pool, pipeline.id, job_name)
        .await?
        .ok_or_else(|| BuildError::JobNotFound(job_name.to_string()))?;

    if job.paused {
        return Err(BuildError::InvalidState(format!(
            "job {:?} is paused",
            job_name
        )));
    }

    // Latest versions allowed by pinning; passed constraints don't gate
    // manual triggers.
    let mut resolved = Vec::with_capacity(job_config.inputs.len());

    for input in &job_config.inputs {
        let resource_config = pipeline
            .config
            .resource(&input.resource)
            .ok_or_else(|| BuildError::NoVersions(input.resource.clone()))?;

        let resource = resource_repository::find_by_name(&app.pool, pipeline.id, &input.resource)
            .await?
            .ok_or_else(|| BuildError::NoVersions(input.resource.clone()))?;

        let versioned = match &input.version {
            VersionConstraint::Pinned(version) => {
                version_repository::find_by_version(&app.pool, resource.id, version).await?
            }
            _ => version_repository::latest(&app.pool, resource.id).await?,
        }
        .ok_or_else(|| BuildError::NoVersions(input.resource.clone()))?;

        resolved.push(ResolvedInput {
            name: input.input_name().to_string(),
            resource: resource_config.clone(),
            version: versioned.version,
            versioned_resource_id: versioned.id,
            params: input.params.clone(),
        });
    }

    let build =
        scheduler::create_pending_build(app, &pipeline, job_config, &job, &resolved, true).await?;

    tracing::info!(
        pipeline = %pipeline_name,
        job = %job_name,
        build = %build.name,
        "manually triggered build"
    );

    scheduler::try_start_build(app, job.id, &build).await?;

    build_repository::find_by_id(&app.pool, build.id)
        .await?
        .ok_or(BuildError::NotFound(build.id))
}

/// Run a one-off build: an orphan plan with no owning job and no scheduling
/// gate. It starts immediately and is tracked like any other build.
pub async fn execute_one_off(
    app: &Arc<App>,
    plan: flightdeck_core::plan::Plan,
) -> Result<Build, BuildError> {
    let metadata = crate::engine::Engine::metadata_for_plan(&plan);

    let build = build_repository::create_orphan(
        &app.pool,
        "one-off",
        crate::engine::ENGINE_NAME,
        &metadata,
    )
    .await?;

    let mut tx = app.pool.begin().await?;
    build_repository::start(&mut tx, build.id).await?;
    tx.commit().await?;

    let started = build_repository::find_by_id(&app.pool, build.id)
        .await?
        .ok_or(BuildError::NotFound(build.id))?;

    let engine_build = app.engine.create_build(started.clone(), plan);
    crate::tracker::spawn_created(app, engine_build).await;

    tracing::info!(build = %build.id, "started one-off build");

    Ok(started)
}

/// Abort a build. Pending builds finalize immediately; started builds get
/// the abort flag and a wakeup for whichever node is tracking them.
pub async fn abort(app: &App, build_id: Uuid) -> Result<(), BuildError> {
    let build = build_repository::find_by_id(&app.pool, build_id)
        .await?
        .ok_or(BuildError::NotFound(build_id))?;

    match build.status {
        BuildStatus::Pending => {
            let delegate = BuildDelegate::new(app.pool.clone(), build_id);
            delegate.finish_build(BuildStatus::Aborted).await?;
            tracing::info!(build = %build_id, "aborted pending build");
            Ok(())
        }
        BuildStatus::Started => {
            build_repository::request_abort(&app.pool, build_id).await?;
            tracing::info!(build = %build_id, "requested abort");
            Ok(())
        }
        status => Err(BuildError::InvalidState(format!(
            "cannot abort build in state {}",
            status
        ))),
    }
}

pub async fn get_build(app: &App, build_id: Uuid) -> Result<Build, BuildError> {
    build_repository::find_by_id(&app.pool, build_id)
        .await?
        .ok_or(BuildError::NotFound(build_id))
}

/// The build's plan in its public serialized form.
pub async fn public_plan(app: &App, build_id: Uuid) -> Result<serde_json::Value, BuildError> {
    let build = get_build(app, build_id).await?;

    let plan: serde_json::Value = build
        .engine_metadata
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|metadata| metadata.get("plan").cloned())
        .ok_or_else(|| BuildError::InvalidState("build has no plan".to_string()))?;

    Ok(serde_json::json!({
        "schema": build.engine,
        "plan": plan,
    }))
}

/// Replay a build's events past `from`.
pub async fn events(app: &App, build_id: Uuid, from: i64) -> Result<Vec<BuildEvent>, BuildError> {
    // Verify the build exists so a bogus id is a 404, not an empty stream.
    let _ = get_build(app, build_id).await?;

    Ok(event_repository::events_from(&app.pool, build_id, from).await?)
}
