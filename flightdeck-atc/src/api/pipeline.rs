//! Pipeline and job API endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use flightdeck_core::dto::pipeline::{PipelineSummary, SaveConfigRequest, SaveConfigResponse};

use crate::api::error::{ApiError, ApiResult};
use crate::app::App;
use crate::repository::job as job_repository;
use crate::service::pipeline as pipeline_service;

pub async fn save_config(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
    Json(req): Json<SaveConfigRequest>,
) -> ApiResult<Json<SaveConfigResponse>> {
    let response = pipeline_service::save_config(&app.pool, app.team_id, &name, req).await?;
    Ok(Json(response))
}

pub async fn get_pipeline(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> ApiResult<Json<PipelineSummary>> {
    let pipeline = pipeline_service::get_pipeline(&app.pool, app.team_id, &name).await?;
    Ok(Json(pipeline.into()))
}

pub async fn list_pipelines(State(app): State<Arc<App>>) -> ApiResult<Json<Vec<PipelineSummary>>> {
    let pipelines = pipeline_service::list_pipelines(&app.pool).await?;
    Ok(Json(pipelines.into_iter().map(|p| p.into()).collect()))
}

pub async fn pause_pipeline(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    pipeline_service::set_paused(&app.pool, app.team_id, &name, true).await?;
    Ok(())
}

pub async fn unpause_pipeline(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    pipeline_service::set_paused(&app.pool, app.team_id, &name, false).await?;
    Ok(())
}

pub async fn delete_pipeline(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    pipeline_service::delete_pipeline(&app.pool, app.team_id, &name).await?;
    Ok(())
}

pub async fn pause_job(
    State(app): State<Arc<App>>,
    Path((name, job)): Path<(String, String)>,
) -> ApiResult<()> {
    set_job_paused(&app, &name, &job, true).await
}

pub async fn unpause_job(
    State(app): State<Arc<App>>,
    Path((name, job)): Path<(String, String)>,
) -> ApiResult<()> {
    set_job_paused(&app, &name, &job, false).await
}

async fn set_job_paused(app: &App, pipeline: &str, job: &str, paused: bool) -> ApiResult<()> {
    let pipeline = pipeline_service::get_pipeline(&app.pool, app.team_id, pipeline).await?;

    let job = job_repository::find_by_name(&app.pool, pipeline.id, job)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {:?}", job)))?;

    job_repository::set_paused(&app.pool, job.id, paused).await?;
    Ok(())
}
