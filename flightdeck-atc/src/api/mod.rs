//! API module
//!
//! HTTP surface of the control plane. Each submodule handles endpoints for a
//! specific domain; handlers stay thin and delegate to the services.

pub mod build;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod resource;
pub mod worker;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::app::App;

/// Create the main API router with all endpoints
pub fn create_router(app: Arc<App>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipelines", get(pipeline::list_pipelines))
        .route("/pipelines/{name}/config", put(pipeline::save_config))
        .route("/pipelines/{name}", get(pipeline::get_pipeline))
        .route("/pipelines/{name}", delete(pipeline::delete_pipeline))
        .route("/pipelines/{name}/pause", put(pipeline::pause_pipeline))
        .route("/pipelines/{name}/unpause", put(pipeline::unpause_pipeline))
        // Job endpoints
        .route(
            "/pipelines/{name}/jobs/{job}/pause",
            put(pipeline::pause_job),
        )
        .route(
            "/pipelines/{name}/jobs/{job}/unpause",
            put(pipeline::unpause_job),
        )
        .route(
            "/pipelines/{name}/jobs/{job}/builds",
            post(build::trigger_build),
        )
        // Build endpoints
        .route("/builds", post(build::execute_build))
        .route("/builds/{id}", get(build::get_build))
        .route("/builds/{id}/abort", put(build::abort_build))
        .route("/builds/{id}/plan", get(build::get_plan))
        .route("/builds/{id}/events", get(build::get_events))
        // Resource endpoints
        .route(
            "/pipelines/{name}/resources",
            get(resource::list_resources),
        )
        .route(
            "/pipelines/{name}/resources/{resource}/check",
            post(resource::check_resource),
        )
        // Worker endpoints
        .route("/workers", get(worker::list_workers))
        .route("/workers", post(worker::register_worker))
        .route("/workers/{name}/heartbeat", put(worker::heartbeat))
        .route("/workers/{name}/land", put(worker::land_worker))
        .route("/workers/{name}/retire", put(worker::retire_worker))
        // Add state and middleware
        .with_state(app)
        .layer(TraceLayer::new_for_http())
}
