//! Build API endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use std::sync::Arc;
use uuid::Uuid;

use flightdeck_core::domain::event::BuildEvent;
use flightdeck_core::dto::build::{BuildSummary, EventsQuery, ExecuteBuildRequest};

use crate::api::error::ApiResult;
use crate::app::App;
use crate::service::build as build_service;

pub async fn trigger_build(
    State(app): State<Arc<App>>,
    Path((pipeline, job)): Path<(String, String)>,
) -> ApiResult<Json<BuildSummary>> {
    let build = build_service::trigger(&app, &pipeline, &job).await?;
    Ok(Json(build.into()))
}

pub async fn execute_build(
    State(app): State<Arc<App>>,
    Json(req): Json<ExecuteBuildRequest>,
) -> ApiResult<Json<BuildSummary>> {
    let build = build_service::execute_one_off(&app, req.plan).await?;
    Ok(Json(build.into()))
}

pub async fn get_build(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BuildSummary>> {
    let build = build_service::get_build(&app, id).await?;
    Ok(Json(build.into()))
}

pub async fn abort_build(State(app): State<Arc<App>>, Path(id): Path<Uuid>) -> ApiResult<()> {
    build_service::abort(&app, id).await?;
    Ok(())
}

pub async fn get_plan(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let plan = build_service::public_plan(&app, id).await?;
    Ok(Json(plan))
}

pub async fn get_events(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<BuildEvent>>> {
    let events = build_service::events(&app, id, query.from).await?;
    Ok(Json(events))
}
