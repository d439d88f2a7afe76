//! Resource API endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;

use flightdeck_core::dto::resource::{CheckResourceRequest, ResourceSummary};

use crate::api::error::ApiResult;
use crate::app::App;
use crate::service::resource as resource_service;

pub async fn list_resources(
    State(app): State<Arc<App>>,
    Path(pipeline): Path<String>,
) -> ApiResult<Json<Vec<ResourceSummary>>> {
    let resources = resource_service::list(&app, &pipeline).await?;
    Ok(Json(resources.into_iter().map(|r| r.into()).collect()))
}

pub async fn check_resource(
    State(app): State<Arc<App>>,
    Path((pipeline, resource)): Path<(String, String)>,
    Json(req): Json<CheckResourceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let new_versions = resource_service::check(&app, &pipeline, &resource, req.from).await?;
    Ok(Json(serde_json::json!({ "new_versions": new_versions })))
}
