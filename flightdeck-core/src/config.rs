//! Pipeline configuration
//!
//! The structural subset of the pipeline surface the control plane relies on:
//! which resources exist, which jobs exist, what each job takes as input
//! (with passed/trigger/version constraints), and what it runs. Anything
//! richer than structure is interpreted by resource-type images and task
//! processes, not here.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::domain::version::Version;
use crate::plan::TaskConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl PipelineConfig {
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// A named display grouping of jobs and resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: serde_json::Value,
    /// Per-resource check interval override, e.g. `"2m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_every: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub serial: bool,
    #[serde(default)]
    pub serial_groups: Vec<String>,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_in_flight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_log_retention: Option<u32>,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    #[serde(default)]
    pub plan: Vec<JobStepConfig>,
}

/// A `get` declaration of a job: which resource, under what name, gated how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Artifact name; defaults to the resource name when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub resource: String,
    /// Upstream jobs whose succeeded builds must have used the version.
    #[serde(default)]
    pub passed: Vec<String>,
    /// Whether a new version of this input starts builds on its own.
    #[serde(default)]
    pub trigger: bool,
    #[serde(default)]
    pub version: VersionConstraint,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl InputConfig {
    pub fn input_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.resource)
    }
}

/// How the scheduler picks a version for an input.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum VersionConstraint {
    /// The newest version satisfying the constraints.
    #[default]
    Latest,
    /// The oldest version this job has not yet built, so every version
    /// eventually produces a build.
    Every,
    /// Exactly this version.
    Pinned(Version),
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VersionConstraint::Latest => serializer.serialize_str("latest"),
            VersionConstraint::Every => serializer.serialize_str("every"),
            VersionConstraint::Pinned(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => match s.as_str() {
                "latest" => Ok(VersionConstraint::Latest),
                "every" => Ok(VersionConstraint::Every),
                other => Err(D::Error::custom(format!(
                    "invalid version constraint {other:?}: expected \"latest\", \"every\", or a version map"
                ))),
            },
            serde_json::Value::Object(map) => {
                let mut version = Version::new();
                for (k, v) in map {
                    match v {
                        serde_json::Value::String(s) => {
                            version.insert(k, s);
                        }
                        other => {
                            return Err(D::Error::custom(format!(
                                "version field {k:?} must be a string, got {other}"
                            )));
                        }
                    }
                }
                Ok(VersionConstraint::Pinned(version))
            }
            other => Err(D::Error::custom(format!(
                "invalid version constraint: {other}"
            ))),
        }
    }
}

/// A step in a job's plan after its inputs are fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum JobStepConfig {
    Task {
        name: String,
        config: TaskConfig,
        #[serde(default)]
        input_mappings: HashMap<String, String>,
        #[serde(default)]
        output_mappings: HashMap<String, String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<String>,
    },
    Put {
        resource: String,
        #[serde(default)]
        params: serde_json::Value,
        #[serde(default)]
        tags: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::version::version;

    #[test]
    fn test_version_constraint_serde() {
        let latest: VersionConstraint = serde_json::from_str("\"latest\"").unwrap();
        assert_eq!(latest, VersionConstraint::Latest);

        let every: VersionConstraint = serde_json::from_str("\"every\"").unwrap();
        assert_eq!(every, VersionConstraint::Every);

        let pinned: VersionConstraint = serde_json::from_str(r#"{"ref": "abc"}"#).unwrap();
        assert_eq!(pinned, VersionConstraint::Pinned(version(&[("ref", "abc")])));

        assert!(serde_json::from_str::<VersionConstraint>("\"newest\"").is_err());
        assert!(serde_json::from_str::<VersionConstraint>(r#"{"ref": 3}"#).is_err());
    }

    #[test]
    fn test_input_name_defaults_to_resource() {
        let input = InputConfig {
            name: None,
            resource: "repo".to_string(),
            passed: vec![],
            trigger: false,
            version: VersionConstraint::Latest,
            params: serde_json::Value::Null,
        };
        assert_eq!(input.input_name(), "repo");

        let renamed = InputConfig {
            name: Some("source".to_string()),
            ..input
        };
        assert_eq!(renamed.input_name(), "source");
    }

    #[test]
    fn test_minimal_config_parses() {
        let json = serde_json::json!({
            "resources": [
                {"name": "repo", "type": "git", "source": {"uri": "u"}}
            ],
            "jobs": [
                {"name": "unit", "inputs": [{"resource": "repo", "trigger": true}]}
            ]
        });
        let config: PipelineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.resources.len(), 1);
        assert_eq!(config.jobs[0].inputs[0].input_name(), "repo");
        assert!(config.jobs[0].inputs[0].trigger);
        assert_eq!(config.jobs[0].inputs[0].version, VersionConstraint::Latest);
    }
}
