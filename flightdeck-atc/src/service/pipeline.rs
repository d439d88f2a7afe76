//! Pipeline service
//!
//! Config saves are the one place pipeline structure changes: the save is
//! gated by the optimistic `config_version` compare, and on success the
//! jobs/resources rows are synced to match (rows for removed entries are
//! pruned, cascading their versions and builds).

use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use flightdeck_core::config::PipelineConfig;
use flightdeck_core::domain::pipeline::Pipeline;
use flightdeck_core::dto::pipeline::{SaveConfigRequest, SaveConfigResponse};

use crate::repository::{
    job as job_repository, pipeline as pipeline_repository, resource as resource_repository,
};

#[derive(Debug)]
pub enum PipelineError {
    NotFound(String),
    /// The caller's `config_version` lost the optimistic compare.
    ConfigComparisonFailed,
    InvalidConfig(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::DatabaseError(err)
    }
}

/// Create or update a pipeline's config.
pub async fn save_config(
    pool: &PgPool,
    team_id: Uuid,
    name: &str,
    req: SaveConfigRequest,
) -> Result<SaveConfigResponse, PipelineError> {
    validate_config(&req.config).map_err(PipelineError::InvalidConfig)?;

    let existing = pipeline_repository::find_by_name(pool, team_id, name).await?;

    let (pipeline_id, config_version, created) = match existing {
        None => {
            if req.config_version != 0 {
                return Err(PipelineError::ConfigComparisonFailed);
            }

            let pipeline = pipeline_repository::create(pool, team_id, name, &req.config).await?;
            tracing::info!(pipeline = %name, "created pipeline");
            (pipeline.id, pipeline.config_version, true)
        }
        Some(pipeline) => {
            let Some(version) =
                pipeline_repository::update_config(pool, pipeline.id, &req.config, req.config_version)
                    .await?
            else {
                return Err(PipelineError::ConfigComparisonFailed);
            };

            tracing::info!(pipeline = %name, config_version = version, "updated pipeline config");
            (pipeline.id, version, false)
        }
    };

    sync_rows(pool, pipeline_id, &req.config).await?;

    Ok(SaveConfigResponse {
        config_version,
        created,
    })
}

/// Upsert job and resource rows from the config and prune removed ones.
async fn sync_rows(
    pool: &PgPool,
    pipeline_id: Uuid,
    config: &PipelineConfig,
) -> Result<(), sqlx::Error> {
    for resource in &config.resources {
        resource_repository::sync_from_config(pool, pipeline_id, resource).await?;
    }
    let resource_names: Vec<String> = config.resources.iter().map(|r| r.name.clone()).collect();
    resource_repository::prune_removed(pool, pipeline_id, &resource_names).await?;

    for job in &config.jobs {
        job_repository::sync_from_config(pool, pipeline_id, job).await?;
    }
    let job_names: Vec<String> = config.jobs.iter().map(|j| j.name.clone()).collect();
    job_repository::prune_removed(pool, pipeline_id, &job_names).await?;

    Ok(())
}

/// Structural checks the scheduler depends on; everything richer is the
/// resource images' problem.
pub fn validate_config(config: &PipelineConfig) -> Result<(), String> {
    let mut resource_names = HashSet::new();
    for resource in &config.resources {
        if !resource_names.insert(resource.name.as_str()) {
            return Err(format!("duplicate resource {:?}", resource.name));
        }
    }

    let mut job_names = HashSet::new();
    for job in &config.jobs {
        if !job_names.insert(job.name.as_str()) {
            return Err(format!("duplicate job {:?}", job.name));
        }
    }

    for job in &config.jobs {
        for input in &job.inputs {
            if !resource_names.contains(input.resource.as_str()) {
                return Err(format!(
                    "job {:?} input references unknown resource {:?}",
                    job.name, input.resource
                ));
            }

            for upstream in &input.passed {
                if !job_names.contains(upstream.as_str()) {
                    return Err(format!(
                        "job {:?} input {:?} passed constraint references unknown job {:?}",
                        job.name,
                        input.input_name(),
                        upstream
                    ));
                }
            }
        }
    }

    Ok(())
}

pub async fn get_pipeline(
    pool: &PgPool,
    team_id: Uuid,
    name: &str,
) -> Result<Pipeline, PipelineError> {
    pipeline_repository::find_by_name(pool, team_id, name)
        .await?
        .ok_or_else(|| PipelineError::NotFound(name.to_string()))
}

pub async fn list_pipelines(pool: &PgPool) -> Result<Vec<Pipeline>, PipelineError> {
    Ok(pipeline_repository::list_all(pool).await?)
}

pub async fn set_paused(
    pool: &PgPool,
    team_id: Uuid,
    name: &str,
    paused: bool,
) -> Result<(), PipelineError> {
    let pipeline = get_pipeline(pool, team_id, name).await?;
    pipeline_repository::set_paused(pool, pipeline.id, paused).await?;

    tracing::info!(pipeline = %name, paused, "set pipeline pause state");
    Ok(())
}

pub async fn delete_pipeline(pool: &PgPool, team_id: Uuid, name: &str) -> Result<(), PipelineError> {
    let pipeline = get_pipeline(pool, team_id, name).await?;
    pipeline_repository::delete(pool, pipeline.id).await?;

    tracing::info!(pipeline = %name, "deleted pipeline");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::config::{InputConfig, JobConfig, ResourceConfig, VersionConstraint};

    fn resource(name: &str) -> ResourceConfig {
        ResourceConfig {
            name: name.to_string(),
            resource_type: "git".to_string(),
            source: serde_json::json!({}),
            check_every: None,
        }
    }

    fn job(name: &str, inputs: Vec<InputConfig>) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            serial: false,
            serial_groups: vec![],
            max_in_flight: 0,
            build_log_retention: None,
            inputs,
            plan: vec![],
        }
    }

    fn input(resource: &str, passed: &[&str]) -> InputConfig {
        InputConfig {
            name: None,
            resource: resource.to_string(),
            passed: passed.iter().map(|s| s.to_string()).collect(),
            trigger: false,
            version: VersionConstraint::Latest,
            params: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = PipelineConfig {
            groups: vec![],
            resources: vec![resource("repo")],
            jobs: vec![
                job("unit", vec![input("repo", &[])]),
                job("deploy", vec![input("repo", &["unit"])]),
            ],
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = PipelineConfig {
            groups: vec![],
            resources: vec![resource("repo"), resource("repo")],
            jobs: vec![],
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_input_resource_rejected() {
        let config = PipelineConfig {
            groups: vec![],
            resources: vec![],
            jobs: vec![job("unit", vec![input("repo", &[])])],
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_passed_job_rejected() {
        let config = PipelineConfig {
            groups: vec![],
            resources: vec![resource("repo")],
            jobs: vec![job("deploy", vec![input("repo", &["unit"])])],
        };
        assert!(validate_config(&config).is_err());
    }
}
