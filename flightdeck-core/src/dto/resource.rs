//! Resource DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::resource::Resource;
use crate::domain::version::Version;

/// Request to check a resource outside its normal interval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResourceRequest {
    /// Check from this version instead of the latest known one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Version>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub paused: bool,
    pub check_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl From<Resource> for ResourceSummary {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
            resource_type: resource.resource_type,
            paused: resource.paused,
            check_error: resource.check_error,
            last_checked: resource.last_checked,
        }
    }
}
