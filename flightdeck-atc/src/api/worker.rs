//! Worker API endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use flightdeck_core::domain::worker::Worker;
use flightdeck_core::dto::worker::{HeartbeatRequest, RegisterWorkerRequest};

use crate::api::error::ApiResult;
use crate::app::App;
use crate::service::worker as worker_service;

pub async fn register_worker(
    State(app): State<Arc<App>>,
    Json(req): Json<RegisterWorkerRequest>,
) -> ApiResult<()> {
    worker_service::register(&app.pool, req).await?;
    Ok(())
}

pub async fn heartbeat(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<()> {
    worker_service::heartbeat(&app.pool, &name, req.active_containers).await?;
    Ok(())
}

pub async fn list_workers(State(app): State<Arc<App>>) -> ApiResult<Json<Vec<Worker>>> {
    let workers = worker_service::list(&app.pool).await?;
    Ok(Json(workers))
}

pub async fn land_worker(State(app): State<Arc<App>>, Path(name): Path<String>) -> ApiResult<()> {
    worker_service::land(&app.pool, &name).await?;
    Ok(())
}

pub async fn retire_worker(State(app): State<Arc<App>>, Path(name): Path<String>) -> ApiResult<()> {
    worker_service::retire(&app.pool, &name).await?;
    Ok(())
}
