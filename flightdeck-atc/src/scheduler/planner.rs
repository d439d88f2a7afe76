//! Plan composition
//!
//! Turns a job's config plus the resolved input versions into the engine
//! plan persisted with the build: an aggregate of gets feeding the job's
//! task and put steps chained by `on_success`, each put followed by its
//! implicit dependent get.

use flightdeck_core::config::{JobConfig, JobStepConfig, PipelineConfig, ResourceConfig};
use flightdeck_core::domain::version::Version;
use flightdeck_core::plan::{
    DependentGetPlan, GetPlan, HookedPlan, Plan, PlanOp, PutPlan, TimeoutPlan,
};

/// An input with its chosen version, ready to become a get step.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub name: String,
    pub resource: ResourceConfig,
    pub version: Version,
    pub versioned_resource_id: i64,
    pub params: serde_json::Value,
}

struct IdGen(u64);

impl IdGen {
    fn next(&mut self) -> String {
        let id = self.0;
        self.0 += 1;
        id.to_string()
    }
}

pub fn plan_for_build(
    config: &PipelineConfig,
    job: &JobConfig,
    inputs: &[ResolvedInput],
) -> Plan {
    let mut ids = IdGen(0);

    let mut steps: Vec<Plan> = Vec::new();

    if !inputs.is_empty() {
        steps.push(gets_plan(&mut ids, inputs));
    }

    for step in &job.plan {
        steps.push(step_plan(&mut ids, config, step));
    }

    steps
        .into_iter()
        .rev()
        .reduce(|next, step| {
            Plan::new(
                ids.next(),
                PlanOp::OnSuccess(HookedPlan {
                    step: Box::new(step),
                    next: Box::new(next),
                }),
            )
        })
        .unwrap_or_else(|| Plan::new(ids.next(), PlanOp::Aggregate(Vec::new())))
}

fn gets_plan(ids: &mut IdGen, inputs: &[ResolvedInput]) -> Plan {
    let mut gets: Vec<Plan> = inputs
        .iter()
        .map(|input| {
            Plan::new(
                ids.next(),
                PlanOp::Get(GetPlan {
                    name: input.name.clone(),
                    resource: input.resource.name.clone(),
                    resource_type: input.resource.resource_type.clone(),
                    source: input.resource.source.clone(),
                    params: input.params.clone(),
                    version: Some(input.version.clone()),
                    tags: vec![],
                }),
            )
        })
        .collect();

    if gets.len() == 1 {
        gets.remove(0)
    } else {
        Plan::new(ids.next(), PlanOp::Aggregate(gets))
    }
}

fn step_plan(ids: &mut IdGen, config: &PipelineConfig, step: &JobStepConfig) -> Plan {
    match step {
        JobStepConfig::Task {
            name,
            config: task_config,
            input_mappings,
            output_mappings,
            tags,
            timeout,
        } => {
            let task = Plan::new(
                ids.next(),
                PlanOp::Task(flightdeck_core::plan::TaskPlan {
                    name: name.clone(),
                    config: task_config.clone(),
                    input_mappings: input_mappings.clone(),
                    output_mappings: output_mappings.clone(),
                    tags: tags.clone(),
                }),
            );

            match timeout {
                Some(duration) => Plan::new(
                    ids.next(),
                    PlanOp::Timeout(TimeoutPlan {
                        step: Box::new(task),
                        duration: duration.clone(),
                    }),
                ),
                None => task,
            }
        }
        JobStepConfig::Put {
            resource,
            params,
            tags,
        } => {
            let (resource_type, source) = match config.resource(resource) {
                Some(r) => (r.resource_type.clone(), r.source.clone()),
                None => (String::new(), serde_json::Value::Null),
            };

            let put = Plan::new(
                ids.next(),
                PlanOp::Put(PutPlan {
                    name: resource.clone(),
                    resource: resource.clone(),
                    resource_type: resource_type.clone(),
                    source: source.clone(),
                    params: params.clone(),
                    tags: tags.clone(),
                }),
            );

            let dependent_get = Plan::new(
                ids.next(),
                PlanOp::DependentGet(DependentGetPlan {
                    name: resource.clone(),
                    resource: resource.clone(),
                    resource_type,
                    source,
                    params: serde_json::Value::Null,
                    tags: tags.clone(),
                }),
            );

            Plan::new(
                ids.next(),
                PlanOp::OnSuccess(HookedPlan {
                    step: Box::new(put),
                    next: Box::new(dependent_get),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::config::InputConfig;
    use flightdeck_core::domain::version::version;
    use flightdeck_core::plan::{TaskConfig, TaskRunConfig};
    use std::collections::HashSet;

    fn resource(name: &str) -> ResourceConfig {
        ResourceConfig {
            name: name.to_string(),
            resource_type: "git".to_string(),
            source: serde_json::json!({"uri": format!("https://example.com/{name}.git")}),
            check_every: None,
        }
    }

    fn resolved(name: &str, id: i64) -> ResolvedInput {
        ResolvedInput {
            name: name.to_string(),
            resource: resource(name),
            version: version(&[("ref", "abc")]),
            versioned_resource_id: id,
            params: serde_json::Value::Null,
        }
    }

    fn task_step(name: &str) -> JobStepConfig {
        JobStepConfig::Task {
            name: name.to_string(),
            config: TaskConfig {
                platform: "linux".to_string(),
                image: "docker:///busybox".to_string(),
                run: TaskRunConfig {
                    path: "true".to_string(),
                    args: vec![],
                },
                inputs: vec![],
                outputs: vec![],
                params: Default::default(),
            },
            input_mappings: Default::default(),
            output_mappings: Default::default(),
            tags: vec![],
            timeout: None,
        }
    }

    fn job(name: &str, inputs: Vec<InputConfig>, plan: Vec<JobStepConfig>) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            serial: false,
            serial_groups: vec![],
            max_in_flight: 0,
            build_log_retention: None,
            inputs,
            plan,
        }
    }

    fn collect_ids(plan: &Plan, out: &mut Vec<String>) {
        out.push(plan.id.clone());
        match &plan.op {
            PlanOp::Aggregate(children) => {
                for child in children {
                    collect_ids(child, out);
                }
            }
            PlanOp::OnSuccess(h) | PlanOp::OnFailure(h) | PlanOp::Ensure(h) => {
                collect_ids(&h.step, out);
                collect_ids(&h.next, out);
            }
            PlanOp::Try(p) => collect_ids(p, out),
            PlanOp::Timeout(t) => collect_ids(&t.step, out),
            _ => {}
        }
    }

    #[test]
    fn test_multiple_gets_aggregate_then_chain_to_task() {
        let config = PipelineConfig {
            groups: vec![],
            resources: vec![resource("repo"), resource("deps")],
            jobs: vec![],
        };
        let job = job("unit", vec![], vec![task_step("unit")]);

        let plan = plan_for_build(&config, &job, &[resolved("repo", 1), resolved("deps", 2)]);

        let PlanOp::OnSuccess(hooked) = &plan.op else {
            panic!("expected on_success at the root");
        };
        assert!(matches!(hooked.step.op, PlanOp::Aggregate(ref gets) if gets.len() == 2));
        assert!(matches!(hooked.next.op, PlanOp::Task(_)));
    }

    #[test]
    fn test_single_get_skips_the_aggregate() {
        let config = PipelineConfig::default();
        let job = job("unit", vec![], vec![task_step("unit")]);

        let plan = plan_for_build(&config, &job, &[resolved("repo", 1)]);

        let PlanOp::OnSuccess(hooked) = &plan.op else {
            panic!("expected on_success at the root");
        };
        assert!(matches!(hooked.step.op, PlanOp::Get(_)));
    }

    #[test]
    fn test_put_gets_an_implicit_dependent_get() {
        let config = PipelineConfig {
            groups: vec![],
            resources: vec![resource("release")],
            jobs: vec![],
        };
        let job = job(
            "ship",
            vec![],
            vec![JobStepConfig::Put {
                resource: "release".to_string(),
                params: serde_json::json!({"path": "out"}),
                tags: vec![],
            }],
        );

        let plan = plan_for_build(&config, &job, &[]);

        let PlanOp::OnSuccess(hooked) = &plan.op else {
            panic!("expected on_success wrapping the put");
        };
        assert!(matches!(hooked.step.op, PlanOp::Put(_)));
        let PlanOp::DependentGet(dg) = &hooked.next.op else {
            panic!("expected the implicit dependent get");
        };
        assert_eq!(dg.resource, "release");
        assert_eq!(dg.resource_type, "git");
    }

    #[test]
    fn test_task_timeout_wraps_the_task() {
        let config = PipelineConfig::default();
        let mut step = task_step("unit");
        if let JobStepConfig::Task { timeout, .. } = &mut step {
            *timeout = Some("5m".to_string());
        }
        let job = job("unit", vec![], vec![step]);

        let plan = plan_for_build(&config, &job, &[]);
        let PlanOp::Timeout(t) = &plan.op else {
            panic!("expected timeout at the root");
        };
        assert_eq!(t.duration, "5m");
        assert!(matches!(t.step.op, PlanOp::Task(_)));
    }

    #[test]
    fn test_plan_ids_are_unique() {
        let config = PipelineConfig {
            groups: vec![],
            resources: vec![resource("repo"), resource("deps"), resource("release")],
            jobs: vec![],
        };
        let job = job(
            "all",
            vec![],
            vec![
                task_step("unit"),
                JobStepConfig::Put {
                    resource: "release".to_string(),
                    params: serde_json::Value::Null,
                    tags: vec![],
                },
            ],
        );

        let plan = plan_for_build(&config, &job, &[resolved("repo", 1), resolved("deps", 2)]);

        let mut ids = Vec::new();
        collect_ids(&plan, &mut ids);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
