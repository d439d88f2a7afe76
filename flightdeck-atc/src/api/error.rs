//! API error handling
//!
//! Unified error type and conversions from the service errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::build::BuildError;
use crate::service::pipeline::PipelineError;
use crate::service::resource::ResourceError;
use crate::service::worker::WorkerError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(name) => ApiError::NotFound(format!("pipeline {:?}", name)),
            PipelineError::ConfigComparisonFailed => {
                ApiError::Conflict("config version comparison failed".to_string())
            }
            PipelineError::InvalidConfig(msg) => ApiError::BadRequest(msg),
            PipelineError::DatabaseError(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::NotFound(id) => ApiError::NotFound(format!("build {}", id)),
            BuildError::PipelineNotFound(name) => {
                ApiError::NotFound(format!("pipeline {:?}", name))
            }
            BuildError::JobNotFound(name) => ApiError::NotFound(format!("job {:?}", name)),
            BuildError::InvalidState(msg) => ApiError::BadRequest(msg),
            BuildError::NoVersions(resource) => {
                ApiError::BadRequest(format!("no versions available for {:?}", resource))
            }
            BuildError::DatabaseError(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::PipelineNotFound(name) => {
                ApiError::NotFound(format!("pipeline {:?}", name))
            }
            ResourceError::NotFound(name) => ApiError::NotFound(format!("resource {:?}", name)),
            ResourceError::CheckFailed(msg) => ApiError::BadRequest(msg),
            ResourceError::DatabaseError(e) => ApiError::DatabaseError(e),
            ResourceError::ScanFailed(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::NotFound(name) => ApiError::NotFound(format!("worker {:?}", name)),
            WorkerError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            WorkerError::DatabaseError(e) => ApiError::DatabaseError(e),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
