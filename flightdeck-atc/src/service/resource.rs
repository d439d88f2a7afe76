//! Resource service
//!
//! Manual checks. An externally-requested scan uses a unique nonce lease so
//! it never has to wait out the periodic interval, but it still funnels
//! through the radar's one scan routine.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use flightdeck_core::domain::resource::Resource;
use flightdeck_core::domain::version::Version;

use crate::app::App;
use crate::radar::{self, ScanError, ScanOutcome};
use crate::repository::{lease as lease_repository, resource as resource_repository};
use crate::service::pipeline::{self as pipeline_service, PipelineError};

/// Manual scans hold their lease only long enough to not collide with
/// themselves.
const MANUAL_SCAN_LEASE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum ResourceError {
    PipelineNotFound(String),
    NotFound(String),
    CheckFailed(String),
    DatabaseError(sqlx::Error),
    ScanFailed(String),
}

impl From<sqlx::Error> for ResourceError {
    fn from(err: sqlx::Error) -> Self {
        ResourceError::DatabaseError(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(name) => ResourceError::PipelineNotFound(name),
            PipelineError::DatabaseError(e) => ResourceError::DatabaseError(e),
            other => ResourceError::ScanFailed(format!("{:?}", other)),
        }
    }
}

pub async fn check(
    app: &Arc<App>,
    pipeline_name: &str,
    resource_name: &str,
    from: Option<Version>,
) -> Result<usize, ResourceError> {
    let pipeline = pipeline_service::get_pipeline(&app.pool, app.team_id, pipeline_name).await?;

    let resource = resource_repository::find_by_name(&app.pool, pipeline.id, resource_name)
        .await?
        .ok_or_else(|| ResourceError::NotFound(resource_name.to_string()))?;

    let lease_name = lease_repository::resource_scanning(resource.id, Uuid::new_v4());

    let outcome = radar::scan(app, &resource, &lease_name, MANUAL_SCAN_LEASE_TTL, from)
        .await
        .map_err(|e: ScanError| ResourceError::ScanFailed(e.to_string()))?;

    match outcome {
        ScanOutcome::Checked(new_versions) => Ok(new_versions),
        ScanOutcome::CheckFailed(message) => Err(ResourceError::CheckFailed(message)),
        ScanOutcome::Paused => Err(ResourceError::ScanFailed(format!(
            "resource {:?} is paused",
            resource_name
        ))),
        // The nonce makes the lease unique, so this is unreachable in
        // practice; surface it rather than hide it.
        ScanOutcome::NotLeased => Err(ResourceError::ScanFailed(
            "could not acquire scan lease".to_string(),
        )),
    }
}

pub async fn list(
    app: &App,
    pipeline_name: &str,
) -> Result<Vec<Resource>, ResourceError> {
    let pipeline = pipeline_service::get_pipeline(&app.pool, app.team_id, pipeline_name).await?;
    Ok(resource_repository::list_for_pipeline(&app.pool, pipeline.id).await?)
}
