//! Build repository
//!
//! Builds are created `pending` inside the scheduler's transaction (inputs
//! and the job's `next_build_id` commit atomically with the row) and move to
//! `started` only under the job row lock. Everything the engine needs to
//! resume lives in `engine_metadata`.

use flightdeck_core::domain::build::{Build, BuildInput, BuildStatus};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, pipeline_id, job_id, name, status, engine, engine_metadata, \
     created_at, start_time, end_time, reap_time, completed, manually_triggered, aborted, drained";

/// Insert a pending build for a job. Caller holds the job row lock and has
/// already advanced the build counter to produce `name`.
pub async fn create_pending(
    tx: &mut Transaction<'_, Postgres>,
    pipeline_id: Uuid,
    job_id: Uuid,
    name: &str,
    engine: &str,
    engine_metadata: &str,
    manually_triggered: bool,
) -> Result<Build, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        INSERT INTO builds
            (id, pipeline_id, job_id, name, status, engine, engine_metadata,
             created_at, manually_triggered)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, now(), $7)
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(pipeline_id)
    .bind(job_id)
    .bind(name)
    .bind(engine)
    .bind(engine_metadata)
    .bind(manually_triggered)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.into())
}

/// Insert an orphan (one-off) build with no job.
pub async fn create_orphan(
    pool: &PgPool,
    name: &str,
    engine: &str,
    engine_metadata: &str,
) -> Result<Build, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        INSERT INTO builds (id, name, status, engine, engine_metadata, created_at, manually_triggered)
        VALUES ($1, $2, 'pending', $3, $4, now(), TRUE)
        RETURNING {SELECT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(engine)
    .bind(engine_metadata)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

pub async fn save_inputs(
    tx: &mut Transaction<'_, Postgres>,
    build_id: Uuid,
    inputs: &[(i64, String)],
) -> Result<(), sqlx::Error> {
    for (versioned_resource_id, name) in inputs {
        sqlx::query(
            r#"
            INSERT INTO build_inputs (build_id, versioned_resource_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (build_id, name) DO NOTHING
            "#,
        )
        .bind(build_id)
        .bind(versioned_resource_id)
        .bind(name)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Record an output as a `put` step succeeds.
pub async fn save_output(
    pool: &PgPool,
    build_id: Uuid,
    versioned_resource_id: i64,
    name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO build_outputs (build_id, versioned_resource_id, name)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(build_id)
    .bind(versioned_resource_id)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(())
}

/// The `pending -> started` transition. Only flips builds still pending, so
/// a concurrent starter loses cleanly.
pub async fn start(
    tx: &mut Transaction<'_, Postgres>,
    build_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE builds
        SET status = 'started', start_time = now()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(build_id)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Finalize a build into a terminal status. Only flips builds not yet
/// completed, so when two trackers race to finalize, exactly one wins.
/// Returns whether this call performed the transition.
pub async fn finish(
    pool: &PgPool,
    build_id: Uuid,
    status: BuildStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE builds
        SET status = $2, end_time = now(), completed = TRUE
        WHERE id = $1 AND completed = FALSE
        "#,
    )
    .bind(build_id)
    .bind(status.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Build>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM builds WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Every started build, for the tracker's resume sweep.
pub async fn all_started(pool: &PgPool) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM builds WHERE status = 'started' ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// In-flight (pending or started) builds of a job, oldest first.
pub async fn in_flight_for_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM builds
        WHERE job_id = $1 AND status IN ('pending', 'started')
        ORDER BY created_at ASC
        "#
    ))
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Running builds across the given jobs. This is the serial/max-in-flight
/// gate's count: pending builds are the queue waiting on the gate, so they
/// never count against it.
pub async fn started_count_for_jobs(
    pool: &PgPool,
    job_ids: &[Uuid],
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM builds
        WHERE job_id = ANY($1) AND status = 'started'
        "#,
    )
    .bind(job_ids)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// The most recent build of a job regardless of status.
pub async fn latest_for_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Build>, sqlx::Error> {
    let row = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM builds
        WHERE job_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Pending builds of a job, oldest first, split by how they were created.
pub async fn pending_for_job(
    pool: &PgPool,
    job_id: Uuid,
    manually_triggered: Option<bool>,
) -> Result<Vec<Build>, sqlx::Error> {
    let rows = match manually_triggered {
        Some(manual) => {
            sqlx::query_as::<_, BuildRow>(&format!(
                r#"
                SELECT {SELECT_COLUMNS} FROM builds
                WHERE job_id = $1 AND status = 'pending' AND manually_triggered = $2
                ORDER BY created_at ASC
                "#
            ))
            .bind(job_id)
            .bind(manual)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, BuildRow>(&format!(
                r#"
                SELECT {SELECT_COLUMNS} FROM builds
                WHERE job_id = $1 AND status = 'pending'
                ORDER BY created_at ASC
                "#
            ))
            .bind(job_id)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn inputs_for_build(pool: &PgPool, build_id: Uuid) -> Result<Vec<BuildInput>, sqlx::Error> {
    let rows: Vec<(Uuid, i64, String)> = sqlx::query_as(
        r#"
        SELECT build_id, versioned_resource_id, name
        FROM build_inputs
        WHERE build_id = $1
        ORDER BY name ASC
        "#,
    )
    .bind(build_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(build_id, versioned_resource_id, name)| BuildInput {
            build_id,
            versioned_resource_id,
            name,
        })
        .collect())
}

/// Flag an abort request; the engine's resume loop is woken over the build's
/// abort channel and observes the flag.
pub async fn request_abort(pool: &PgPool, build_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE builds SET aborted = TRUE WHERE id = $1")
        .bind(build_id)
        .execute(pool)
        .await?;

    sqlx::query("SELECT pg_notify($1, '')")
        .bind(abort_channel(build_id))
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn abort_requested(pool: &PgPool, build_id: Uuid) -> Result<bool, sqlx::Error> {
    let row: Option<(bool,)> = sqlx::query_as("SELECT aborted FROM builds WHERE id = $1")
        .bind(build_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(aborted,)| aborted).unwrap_or(false))
}

/// Completed, undrained builds for the syslog drainer.
pub async fn all_drainable(pool: &PgPool) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM builds
        WHERE completed = TRUE AND drained = FALSE AND reap_time IS NULL
        ORDER BY created_at ASC
        "#
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn set_drained(pool: &PgPool, build_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE builds SET drained = TRUE WHERE id = $1")
        .bind(build_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Completed builds of a job past the newest `keep`, for the build reaper.
pub async fn reapable_for_job(
    pool: &PgPool,
    job_id: Uuid,
    keep: i64,
) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM builds
        WHERE job_id = $1 AND completed = TRUE AND reap_time IS NULL
        ORDER BY created_at DESC
        OFFSET $2
        "#
    ))
    .bind(job_id)
    .bind(keep)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn set_reap_time(pool: &PgPool, build_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE builds SET reap_time = now() WHERE id = $1")
        .bind(build_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// The notification channel an abort request is published on.
pub fn abort_channel(build_id: Uuid) -> String {
    format!("build_abort_{}", build_id.simple())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_status(s: &str) -> BuildStatus {
    match s {
        "pending" => BuildStatus::Pending,
        "started" => BuildStatus::Started,
        "succeeded" => BuildStatus::Succeeded,
        "failed" => BuildStatus::Failed,
        "errored" => BuildStatus::Errored,
        "aborted" => BuildStatus::Aborted,
        _ => BuildStatus::Errored,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    pipeline_id: Option<Uuid>,
    job_id: Option<Uuid>,
    name: String,
    status: String,
    engine: String,
    engine_metadata: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    end_time: Option<chrono::DateTime<chrono::Utc>>,
    reap_time: Option<chrono::DateTime<chrono::Utc>>,
    completed: bool,
    manually_triggered: bool,
    aborted: bool,
    drained: bool,
}

impl From<BuildRow> for Build {
    fn from(row: BuildRow) -> Self {
        Build {
            id: row.id,
            pipeline_id: row.pipeline_id,
            job_id: row.job_id,
            name: row.name,
            status: string_to_status(&row.status),
            engine: row.engine,
            engine_metadata: row.engine_metadata,
            created_at: row.created_at,
            start_time: row.start_time,
            end_time: row.end_time,
            reap_time: row.reap_time,
            completed: row.completed,
            manually_triggered: row.manually_triggered,
            aborted: row.aborted,
            drained: row.drained,
        }
    }
}
