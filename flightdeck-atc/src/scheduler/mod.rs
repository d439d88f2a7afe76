//! Scheduler
//!
//! Invoked per pipeline on a fixed tick. For each job, in config declaration
//! order: start any pending builds whose gate now opens, then decide whether
//! a new build should exist: candidate inputs resolve, the tuple differs
//! from the previous build's (or a trigger input moved), and no
//! automatically-created pending build is already waiting. Creation persists
//! the build, its inputs, and the job pointer in one transaction; the
//! `pending -> started` flip re-checks the gate under the job row lock.
//!
//! Scheduling errors never mark a build anything; they log and the next tick
//! retries.

pub mod inputs;
pub mod planner;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flightdeck_core::config::{InputConfig, JobConfig, VersionConstraint};
use flightdeck_core::domain::build::Build;
use flightdeck_core::domain::job::Job;
use flightdeck_core::domain::pipeline::Pipeline;

use crate::app::App;
use crate::engine::{Engine, ENGINE_NAME};
use crate::repository::{
    build as build_repository, job as job_repository, resource as resource_repository,
    version as version_repository,
};
use crate::tracker;
use inputs::{Candidate, InputCandidates};
use planner::ResolvedInput;

/// How deep into a resource's history candidate loading reaches.
const CANDIDATE_LIMIT: i64 = 100;

const SCHEDULING_INTERVAL: Duration = Duration::from_secs(10);

/// The per-pipeline scheduling loop, one runner-group member.
pub async fn run(app: Arc<App>, pipeline: Pipeline, token: CancellationToken) {
    let mut ticker = tokio::time::interval(SCHEDULING_INTERVAL);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        for job_config in &pipeline.config.jobs {
            if token.is_cancelled() {
                return;
            }

            if let Err(e) = schedule_job(&app, &pipeline, job_config).await {
                warn!(
                    pipeline = %pipeline.name,
                    job = %job_config.name,
                    "scheduling pass failed: {}", e
                );
            }
        }
    }
}

async fn schedule_job(
    app: &App,
    pipeline: &Pipeline,
    job_config: &JobConfig,
) -> Result<(), sqlx::Error> {
    let Some(job) = job_repository::find_by_name(&app.pool, pipeline.id, &job_config.name).await?
    else {
        debug!(job = %job_config.name, "job row not yet synced; skipping");
        return Ok(());
    };

    // Builds created earlier (by this node, a peer, or a manual trigger)
    // whose gate was closed get their start attempt first.
    for pending in build_repository::pending_for_job(&app.pool, job.id, None).await? {
        try_start_build(app, job.id, &pending).await?;
    }

    if job.paused {
        return Ok(());
    }

    if !is_startable(app, &job).await? {
        return Ok(());
    }

    let Some(resolved) = resolve_job_inputs(app, pipeline, &job, job_config).await? else {
        return Ok(());
    };

    if !should_create_build(app, &job, job_config, &resolved).await? {
        return Ok(());
    }

    // At most one automatically-scheduled pending build per job.
    let pending_auto = build_repository::pending_for_job(&app.pool, job.id, Some(false)).await?;
    if !pending_auto.is_empty() {
        return Ok(());
    }

    let build = create_pending_build(app, pipeline, job_config, &job, &resolved, false).await?;

    info!(
        pipeline = %pipeline.name,
        job = %job.name,
        build = %build.name,
        "created build"
    );

    try_start_build(app, job.id, &build).await?;

    Ok(())
}

// =============================================================================
// Step A: Triggerability
// =============================================================================

/// Whether the job may start a build right now, given how many builds are
/// running in its serial groups and for the job itself. Pure; callers supply
/// counts read under the job row lock.
pub fn can_start(job: &Job, running_in_groups: i64, running_for_job: i64) -> bool {
    if job.paused {
        return false;
    }

    if !job.effective_serial_groups().is_empty() && running_in_groups > 0 {
        return false;
    }

    if job.max_in_flight > 0 && running_for_job >= job.max_in_flight as i64 {
        return false;
    }

    true
}

async fn is_startable(app: &App, job: &Job) -> Result<bool, sqlx::Error> {
    let groups = job.effective_serial_groups();

    let running_in_groups = if groups.is_empty() {
        0
    } else {
        let group_jobs =
            job_repository::with_overlapping_serial_groups(&app.pool, job.pipeline_id, &groups)
                .await?;
        let ids: Vec<Uuid> = group_jobs.iter().map(|j| j.id).collect();
        build_repository::started_count_for_jobs(&app.pool, &ids).await?
    };

    let running_for_job = build_repository::started_count_for_jobs(&app.pool, &[job.id]).await?;

    Ok(can_start(job, running_in_groups, running_for_job))
}

// =============================================================================
// Step B: Input candidate selection
// =============================================================================

async fn resolve_job_inputs(
    app: &App,
    pipeline: &Pipeline,
    job: &Job,
    job_config: &JobConfig,
) -> Result<Option<Vec<ResolvedInput>>, sqlx::Error> {
    if job_config.inputs.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let mut candidate_sets = Vec::with_capacity(job_config.inputs.len());

    for input in &job_config.inputs {
        let Some(set) = load_candidates(app, pipeline, job, input).await? else {
            debug!(job = %job.name, input = %input.input_name(), "no candidate versions");
            return Ok(None);
        };
        candidate_sets.push(set);
    }

    let Some(resolution) = inputs::resolve(&candidate_sets) else {
        debug!(job = %job.name, "no feasible input tuple");
        return Ok(None);
    };

    let mut resolved = Vec::with_capacity(resolution.len());

    for (choice, input) in resolution.iter().zip(&job_config.inputs) {
        let Some(resource_config) = pipeline.config.resource(&input.resource) else {
            debug!(job = %job.name, resource = %input.resource, "input names unknown resource");
            return Ok(None);
        };

        let Some(versioned) =
            version_repository::find_by_id(&app.pool, choice.versioned_resource_id).await?
        else {
            return Ok(None);
        };

        resolved.push(ResolvedInput {
            name: input.input_name().to_string(),
            resource: resource_config.clone(),
            version: versioned.version,
            versioned_resource_id: versioned.id,
            params: input.params.clone(),
        });
    }

    Ok(Some(resolved))
}

/// Load the preference-ordered candidate list for one input, or None when
/// the input cannot currently be satisfied at all.
async fn load_candidates(
    app: &App,
    pipeline: &Pipeline,
    job: &Job,
    input: &InputConfig,
) -> Result<Option<InputCandidates>, sqlx::Error> {
    let Some(resource) =
        resource_repository::find_by_name(&app.pool, pipeline.id, &input.resource).await?
    else {
        return Ok(None);
    };

    let versions = match &input.version {
        VersionConstraint::Latest => {
            version_repository::candidates(&app.pool, resource.id, CANDIDATE_LIMIT).await?
        }
        VersionConstraint::Pinned(version) => {
            match version_repository::find_by_version(&app.pool, resource.id, version).await? {
                Some(v) => vec![v],
                None => return Ok(None),
            }
        }
        VersionConstraint::Every => {
            let built: HashSet<i64> = version_repository::built_version_ids(&app.pool, job.id, resource.id)
                .await?
                .into_iter()
                .collect();

            let mut all =
                version_repository::candidates(&app.pool, resource.id, CANDIDATE_LIMIT).await?;

            // Oldest unbuilt version first; when everything has been built,
            // fall back to the newest.
            let unbuilt = all
                .iter()
                .filter(|v| !built.contains(&v.id))
                .min_by_key(|v| v.check_order)
                .cloned();

            match unbuilt {
                Some(v) => vec![v],
                None => match all.drain(..).next() {
                    Some(latest) => vec![latest],
                    None => return Ok(None),
                },
            }
        }
    };

    if versions.is_empty() {
        return Ok(None);
    }

    let mut candidates = Vec::with_capacity(versions.len());

    for versioned in versions {
        let mut passed_builds = HashMap::new();

        for upstream_name in &input.passed {
            let Some(upstream) =
                job_repository::find_by_name(&app.pool, pipeline.id, upstream_name).await?
            else {
                return Ok(None);
            };

            let used =
                version_repository::versions_used_by_succeeded_builds(&app.pool, upstream.id, resource.id)
                    .await?;

            let builds: HashSet<Uuid> = used
                .into_iter()
                .filter(|(vr_id, _)| *vr_id == versioned.id)
                .map(|(_, build_id)| build_id)
                .collect();

            passed_builds.insert(upstream_name.clone(), builds);
        }

        candidates.push(Candidate {
            versioned_resource_id: versioned.id,
            check_order: versioned.check_order,
            passed_builds,
        });
    }

    Ok(Some(InputCandidates {
        name: input.input_name().to_string(),
        passed: input.passed.clone(),
        candidates,
    }))
}

// =============================================================================
// Step C: De-duplication against the previous build
// =============================================================================

/// Whether a new build should exist: the chosen tuple differs from the most
/// recent build's inputs, or a `trigger: true` input moved past the version
/// that build used. Pure over the loaded id sets.
pub fn should_trigger(
    previous_inputs: Option<&HashSet<i64>>,
    chosen: &HashSet<i64>,
    trigger_input_newer: bool,
) -> bool {
    match previous_inputs {
        None => true,
        Some(previous) => previous != chosen || trigger_input_newer,
    }
}

async fn should_create_build(
    app: &App,
    job: &Job,
    job_config: &JobConfig,
    resolved: &[ResolvedInput],
) -> Result<bool, sqlx::Error> {
    let chosen: HashSet<i64> = resolved.iter().map(|r| r.versioned_resource_id).collect();

    let Some(previous) = build_repository::latest_for_job(&app.pool, job.id).await? else {
        return Ok(should_trigger(None, &chosen, false));
    };

    let previous_inputs = build_repository::inputs_for_build(&app.pool, previous.id).await?;
    let previous_by_name: HashMap<&str, i64> = previous_inputs
        .iter()
        .map(|i| (i.name.as_str(), i.versioned_resource_id))
        .collect();
    let previous_set: HashSet<i64> = previous_inputs
        .iter()
        .map(|i| i.versioned_resource_id)
        .collect();

    let mut trigger_newer = false;

    for (input, choice) in job_config.inputs.iter().zip(resolved) {
        if !input.trigger {
            continue;
        }

        let Some(&previous_id) = previous_by_name.get(input.input_name()) else {
            trigger_newer = true;
            continue;
        };

        if previous_id == choice.versioned_resource_id {
            continue;
        }

        let previous_order = version_repository::find_by_id(&app.pool, previous_id)
            .await?
            .map(|v| v.check_order)
            .unwrap_or(i32::MIN);

        let chosen_order = version_repository::find_by_id(&app.pool, choice.versioned_resource_id)
            .await?
            .map(|v| v.check_order)
            .unwrap_or(i32::MIN);

        if chosen_order > previous_order {
            trigger_newer = true;
        }
    }

    Ok(should_trigger(Some(&previous_set), &chosen, trigger_newer))
}

// =============================================================================
// Steps D & E: Persist and start
// =============================================================================

/// One transaction: job lock, build counter, pending build row, input edges,
/// and the job's next-build pointer.
pub async fn create_pending_build(
    app: &App,
    pipeline: &Pipeline,
    job_config: &JobConfig,
    job: &Job,
    resolved: &[ResolvedInput],
    manually_triggered: bool,
) -> Result<Build, sqlx::Error> {
    let plan = planner::plan_for_build(&pipeline.config, job_config, resolved);
    let metadata = Engine::metadata_for_plan(&plan);

    let mut tx = app.pool.begin().await?;

    let locked = job_repository::lock(&mut tx, job.id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

    let number = job_repository::next_build_number(&mut tx, locked.id).await?;

    let build = build_repository::create_pending(
        &mut tx,
        pipeline.id,
        locked.id,
        &number.to_string(),
        ENGINE_NAME,
        &metadata,
        manually_triggered,
    )
    .await?;

    let input_rows: Vec<(i64, String)> = resolved
        .iter()
        .map(|r| (r.versioned_resource_id, r.name.clone()))
        .collect();
    build_repository::save_inputs(&mut tx, build.id, &input_rows).await?;

    job_repository::set_next_build(&mut tx, locked.id, build.id).await?;

    tx.commit().await?;

    Ok(build)
}

/// Attempt `pending -> started`. The gate is re-checked under the job row
/// lock; on success the build is handed to the engine under its tracking
/// lease.
pub async fn try_start_build(app: &App, job_id: Uuid, build: &Build) -> Result<bool, sqlx::Error> {
    let mut tx = app.pool.begin().await?;

    let Some(job) = job_repository::lock(&mut tx, job_id).await? else {
        return Ok(false);
    };

    // The lock serializes every starter and creator for this job, so counts
    // read outside the transaction cannot move under us.
    if !is_startable(app, &job).await? {
        tx.rollback().await?;
        return Ok(false);
    }

    if !build_repository::start(&mut tx, build.id).await? {
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;

    info!(job = %job.name, build = %build.name, "started build");

    if let Some(fresh) = build_repository::find_by_id(&app.pool, build.id).await? {
        tracker::spawn_resume(app, fresh).await;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(serial: bool, max_in_flight: i32) -> Job {
        Job {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            name: "deploy".to_string(),
            paused: false,
            serial,
            serial_groups: vec![],
            max_in_flight,
            build_number: 0,
            first_logged_build_id: None,
            latest_completed_build_id: None,
            next_build_id: None,
            transition_build_id: None,
            build_log_retention: None,
        }
    }

    #[test]
    fn test_serial_job_blocked_by_in_flight_build() {
        let j = job(true, 0);
        assert!(!can_start(&j, 1, 1));
        assert!(can_start(&j, 0, 0));
    }

    #[test]
    fn test_paused_job_never_starts() {
        let mut j = job(false, 0);
        j.paused = true;
        assert!(!can_start(&j, 0, 0));
    }

    #[test]
    fn test_max_in_flight_caps_parallelism() {
        let j = job(false, 2);
        assert!(can_start(&j, 0, 1));
        assert!(!can_start(&j, 0, 2));
        assert!(!can_start(&j, 0, 3));
    }

    #[test]
    fn test_unconstrained_job_always_starts() {
        let j = job(false, 0);
        assert!(can_start(&j, 5, 5));
    }

    #[test]
    fn test_first_build_always_triggers() {
        let chosen: HashSet<i64> = [1, 2].into_iter().collect();
        assert!(should_trigger(None, &chosen, false));
    }

    #[test]
    fn test_identical_tuple_does_not_retrigger() {
        let previous: HashSet<i64> = [1, 2].into_iter().collect();
        let chosen = previous.clone();
        assert!(!should_trigger(Some(&previous), &chosen, false));
    }

    #[test]
    fn test_changed_tuple_triggers() {
        let previous: HashSet<i64> = [1, 2].into_iter().collect();
        let chosen: HashSet<i64> = [1, 3].into_iter().collect();
        assert!(should_trigger(Some(&previous), &chosen, false));
    }

    #[test]
    fn test_trigger_input_moving_forward_triggers() {
        let previous: HashSet<i64> = [1, 2].into_iter().collect();
        let chosen = previous.clone();
        assert!(should_trigger(Some(&previous), &chosen, true));
    }
}
