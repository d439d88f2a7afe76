//! Pipeline domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;

/// A saved pipeline
///
/// Uniqueness is on `(team_id, name)`. `config_version` increments on every
/// successful config save and gates optimistic updates. `ordering` controls
/// the order pipelines are displayed and synced in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub paused: bool,
    pub ordering: i32,
    pub config_version: i32,
    pub config: PipelineConfig,
}
