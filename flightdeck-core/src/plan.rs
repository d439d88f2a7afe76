//! Build plans
//!
//! A plan is a recursive tree of step operators. In memory it is a tagged sum
//! type with one case per operator; on the wire and in `engine_metadata` it is
//! a record of optional fields, exactly one of which is set per node. A node
//! that sets none (a variant from a newer release) or more than one fails
//! deserialization, which errors the build on resume instead of misrunning it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::version::Version;

/// Identifies a node within one build's plan. Step identity
/// `(build_id, plan_id, step_type, step_name)` must be stable across resumes,
/// so plan ids are assigned once, when the plan is composed, and persist with
/// it.
pub type PlanId = String;

/// One node of the step tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPlan", into = "RawPlan")]
pub struct Plan {
    pub id: PlanId,
    pub op: PlanOp,
}

impl Plan {
    pub fn new(id: impl Into<PlanId>, op: PlanOp) -> Self {
        Self { id: id.into(), op }
    }
}

/// The step operators.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOp {
    /// Run children in parallel; succeed iff all succeed.
    Aggregate(Vec<Plan>),
    /// Run `next` only if `step` succeeded.
    OnSuccess(HookedPlan),
    /// Run `next` only if `step` ran and failed (not errored, not aborted).
    OnFailure(HookedPlan),
    /// Always run `next` after `step`; success = both succeeded.
    Ensure(HookedPlan),
    /// Mask `step` failure to success; errors still propagate.
    Try(Box<Plan>),
    /// Abort `step` if not done in the duration; expiry counts as failure,
    /// not error.
    Timeout(TimeoutPlan),
    /// Fetch a version of a resource into a working volume.
    Get(GetPlan),
    /// Publish, then (by planner convention) an implicit dependent get.
    Put(PutPlan),
    /// The get half of a put; the version comes from the preceding put.
    DependentGet(DependentGetPlan),
    /// Run a configured process with named input/output volumes mounted.
    Task(TaskPlan),
}

/// A step with a follow-up step (`on_success`, `on_failure`, `ensure`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookedPlan {
    pub step: Box<Plan>,
    pub next: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPlan {
    pub step: Box<Plan>,
    /// Parsed by `crate::duration` when the step tree is built.
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPlan {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: serde_json::Value,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutPlan {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: serde_json::Value,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentGetPlan {
    pub name: String,
    pub resource: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: serde_json::Value,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub name: String,
    pub config: TaskConfig,
    #[serde(default)]
    pub input_mappings: HashMap<String, String>,
    #[serde(default)]
    pub output_mappings: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// What a task runs and what it mounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub platform: String,
    /// Rootfs image reference the worker materializes.
    pub image: String,
    pub run: TaskRunConfig,
    #[serde(default)]
    pub inputs: Vec<TaskVolumeConfig>,
    #[serde(default)]
    pub outputs: Vec<TaskVolumeConfig>,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunConfig {
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// A named mount point in a task container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskVolumeConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Error)]
pub enum PlanFormatError {
    #[error("plan node {id:?} sets no known operator")]
    Empty { id: PlanId },
    #[error("plan node {id:?} sets {count} operators; exactly one is allowed")]
    Ambiguous { id: PlanId, count: usize },
}

/// The serialized shape: a union of optionals. Unknown fields from newer
/// releases are tolerated here and surface as `Empty` when no known operator
/// is set.
#[derive(Serialize, Deserialize)]
struct RawPlan {
    id: PlanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aggregate: Option<Vec<Plan>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_success: Option<HookedPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_failure: Option<HookedPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ensure: Option<HookedPlan>,
    #[serde(rename = "try", default, skip_serializing_if = "Option::is_none")]
    try_: Option<Box<Plan>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<TimeoutPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    get: Option<GetPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    put: Option<PutPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dependent_get: Option<DependentGetPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task: Option<TaskPlan>,
}

impl From<Plan> for RawPlan {
    fn from(plan: Plan) -> Self {
        let mut raw = RawPlan {
            id: plan.id,
            aggregate: None,
            on_success: None,
            on_failure: None,
            ensure: None,
            try_: None,
            timeout: None,
            get: None,
            put: None,
            dependent_get: None,
            task: None,
        };

        match plan.op {
            PlanOp::Aggregate(plans) => raw.aggregate = Some(plans),
            PlanOp::OnSuccess(h) => raw.on_success = Some(h),
            PlanOp::OnFailure(h) => raw.on_failure = Some(h),
            PlanOp::Ensure(h) => raw.ensure = Some(h),
            PlanOp::Try(p) => raw.try_ = Some(p),
            PlanOp::Timeout(t) => raw.timeout = Some(t),
            PlanOp::Get(g) => raw.get = Some(g),
            PlanOp::Put(p) => raw.put = Some(p),
            PlanOp::DependentGet(d) => raw.dependent_get = Some(d),
            PlanOp::Task(t) => raw.task = Some(t),
        }

        raw
    }
}

impl TryFrom<RawPlan> for Plan {
    type Error = PlanFormatError;

    fn try_from(raw: RawPlan) -> Result<Self, Self::Error> {
        let mut ops: Vec<PlanOp> = Vec::new();

        if let Some(plans) = raw.aggregate {
            ops.push(PlanOp::Aggregate(plans));
        }
        if let Some(h) = raw.on_success {
            ops.push(PlanOp::OnSuccess(h));
        }
        if let Some(h) = raw.on_failure {
            ops.push(PlanOp::OnFailure(h));
        }
        if let Some(h) = raw.ensure {
            ops.push(PlanOp::Ensure(h));
        }
        if let Some(p) = raw.try_ {
            ops.push(PlanOp::Try(p));
        }
        if let Some(t) = raw.timeout {
            ops.push(PlanOp::Timeout(t));
        }
        if let Some(g) = raw.get {
            ops.push(PlanOp::Get(g));
        }
        if let Some(p) = raw.put {
            ops.push(PlanOp::Put(p));
        }
        if let Some(d) = raw.dependent_get {
            ops.push(PlanOp::DependentGet(d));
        }
        if let Some(t) = raw.task {
            ops.push(PlanOp::Task(t));
        }

        match ops.len() {
            0 => Err(PlanFormatError::Empty { id: raw.id }),
            1 => Ok(Plan {
                id: raw.id,
                op: ops.into_iter().next().unwrap(),
            }),
            count => Err(PlanFormatError::Ambiguous { id: raw.id, count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::version::version;

    fn sample_get(id: &str, name: &str) -> Plan {
        Plan::new(
            id,
            PlanOp::Get(GetPlan {
                name: name.to_string(),
                resource: name.to_string(),
                resource_type: "git".to_string(),
                source: serde_json::json!({"uri": "https://example.com/repo.git"}),
                params: serde_json::Value::Null,
                version: Some(version(&[("ref", "abc123")])),
                tags: vec![],
            }),
        )
    }

    fn sample_task(id: &str) -> Plan {
        Plan::new(
            id,
            PlanOp::Task(TaskPlan {
                name: "unit".to_string(),
                config: TaskConfig {
                    platform: "linux".to_string(),
                    image: "docker:///busybox".to_string(),
                    run: TaskRunConfig {
                        path: "sh".to_string(),
                        args: vec!["-c".to_string(), "true".to_string()],
                    },
                    inputs: vec![TaskVolumeConfig {
                        name: "repo".to_string(),
                        path: None,
                    }],
                    outputs: vec![],
                    params: HashMap::new(),
                },
                input_mappings: HashMap::new(),
                output_mappings: HashMap::new(),
                tags: vec![],
            }),
        )
    }

    #[test]
    fn test_round_trip_preserves_tree() {
        let plan = Plan::new(
            "3",
            PlanOp::OnSuccess(HookedPlan {
                step: Box::new(Plan::new(
                    "2",
                    PlanOp::Aggregate(vec![sample_get("0", "repo"), sample_get("1", "deps")]),
                )),
                next: Box::new(Plan::new(
                    "5",
                    PlanOp::Timeout(TimeoutPlan {
                        step: Box::new(sample_task("4")),
                        duration: "5m".to_string(),
                    }),
                )),
            }),
        );

        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn test_serializes_as_union_of_optionals() {
        let json = serde_json::to_value(sample_get("0", "repo")).unwrap();
        assert!(json.get("get").is_some());
        assert!(json.get("task").is_none());
        assert!(json.get("aggregate").is_none());
        assert_eq!(json["id"], "0");
    }

    #[test]
    fn test_unknown_operator_fails_deserialization() {
        // A node from a newer release that only sets an operator we don't
        // know about must not silently become a no-op.
        let json = r#"{"id": "0", "parallel": {"steps": []}}"#;
        let result: Result<Plan, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_ambiguous_node_fails_deserialization() {
        let get = serde_json::to_value(sample_get("0", "repo")).unwrap();
        let task = serde_json::to_value(sample_task("0")).unwrap();
        let merged = serde_json::json!({
            "id": "0",
            "get": get["get"],
            "task": task["task"],
        });
        let result: Result<Plan, _> = serde_json::from_value(merged);
        assert!(result.is_err());
    }

    #[test]
    fn test_try_round_trip_uses_reserved_word_field() {
        let plan = Plan::new("1", PlanOp::Try(Box::new(sample_task("0"))));
        let json = serde_json::to_value(&plan).unwrap();
        assert!(json.get("try").is_some());
        let back: Plan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
    }
}
