//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::pipeline::Pipeline;

/// Request to save a pipeline's configuration.
///
/// `config_version` is the version the caller last read; 0 means "create".
/// A mismatch with the stored version is rejected so concurrent writers
/// cannot clobber each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfigRequest {
    pub config: PipelineConfig,
    #[serde(default)]
    pub config_version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfigResponse {
    pub config_version: i32,
    pub created: bool,
}

/// Lightweight pipeline summary for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub paused: bool,
    pub ordering: i32,
    pub config_version: i32,
}

impl From<Pipeline> for PipelineSummary {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            id: pipeline.id,
            name: pipeline.name,
            paused: pipeline.paused,
            ordering: pipeline.ordering,
            config_version: pipeline.config_version,
        }
    }
}
