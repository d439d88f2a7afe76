//! Resource domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A saved resource within a pipeline
///
/// `source` is an opaque key/value bundle interpreted by the resource type's
/// container image; the control plane never looks inside it beyond hashing it
/// for cache identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub resource_type: String,
    pub source: serde_json::Value,
    pub check_every: Option<String>,
    pub paused: bool,
    pub check_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}
