//! Job repository
//!
//! Job rows are synced from the pipeline config on every save; the scheduling
//! knobs live in columns so triggerability checks are plain SQL. The
//! `pending -> started` transition and the build-number counter are both
//! guarded by the job row lock taken with `lock` inside a transaction.

use flightdeck_core::config::JobConfig;
use flightdeck_core::domain::job::Job;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Upsert a job row from its config, preserving counters and history
/// pointers.
pub async fn sync_from_config(
    pool: &PgPool,
    pipeline_id: Uuid,
    config: &JobConfig,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, pipeline_id, name, serial, serial_groups, max_in_flight, build_log_retention)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (pipeline_id, name) DO UPDATE
        SET serial = EXCLUDED.serial,
            serial_groups = EXCLUDED.serial_groups,
            max_in_flight = EXCLUDED.max_in_flight,
            build_log_retention = EXCLUDED.build_log_retention
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(pipeline_id)
    .bind(&config.name)
    .bind(config.serial)
    .bind(&config.serial_groups)
    .bind(config.max_in_flight as i32)
    .bind(config.build_log_retention.map(|n| n as i32))
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove jobs no longer present in the config; their builds cascade.
pub async fn prune_removed(
    pool: &PgPool,
    pipeline_id: Uuid,
    keep_names: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM jobs WHERE pipeline_id = $1 AND name <> ALL($2)")
        .bind(pipeline_id)
        .bind(keep_names)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, pipeline_id, name, paused, serial, serial_groups, max_in_flight,
               build_number, first_logged_build_id, latest_completed_build_id,
               next_build_id, transition_build_id, build_log_retention
        FROM jobs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_name(
    pool: &PgPool,
    pipeline_id: Uuid,
    name: &str,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, pipeline_id, name, paused, serial, serial_groups, max_in_flight,
               build_number, first_logged_build_id, latest_completed_build_id,
               next_build_id, transition_build_id, build_log_retention
        FROM jobs
        WHERE pipeline_id = $1 AND name = $2
        "#,
    )
    .bind(pipeline_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn list_for_pipeline(pool: &PgPool, pipeline_id: Uuid) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, pipeline_id, name, paused, serial, serial_groups, max_in_flight,
               build_number, first_logged_build_id, latest_completed_build_id,
               next_build_id, transition_build_id, build_log_retention
        FROM jobs
        WHERE pipeline_id = $1
        ORDER BY name ASC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn set_paused(pool: &PgPool, id: Uuid, paused: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE jobs SET paused = $2 WHERE id = $1")
        .bind(id)
        .bind(paused)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Lock the job row for the remainder of the transaction and return its
/// current state. Serial checks and the pending->started transition happen
/// under this lock.
pub async fn lock(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, pipeline_id, name, paused, serial, serial_groups, max_in_flight,
               build_number, first_logged_build_id, latest_completed_build_id,
               next_build_id, transition_build_id, build_log_retention
        FROM jobs
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Advance the per-job build counter; the returned number becomes the new
/// build's name. Caller must hold the job row lock.
pub async fn next_build_number(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        UPDATE jobs SET build_number = build_number + 1
        WHERE id = $1
        RETURNING build_number
        "#,
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(n)
}

pub async fn set_next_build(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    build_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE jobs SET next_build_id = $2 WHERE id = $1")
        .bind(id)
        .bind(build_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Record a finished build in the job's history pointers. The transition
/// build only moves when the status changed from the previous completed
/// build's.
pub async fn record_completed_build(
    pool: &PgPool,
    id: Uuid,
    build_id: Uuid,
    status_changed: bool,
) -> Result<(), sqlx::Error> {
    if status_changed {
        sqlx::query(
            "UPDATE jobs SET latest_completed_build_id = $2, transition_build_id = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(build_id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query("UPDATE jobs SET latest_completed_build_id = $2 WHERE id = $1")
            .bind(id)
            .bind(build_id)
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Jobs of this pipeline whose serial groups overlap the given set,
/// including the job itself.
pub async fn with_overlapping_serial_groups(
    pool: &PgPool,
    pipeline_id: Uuid,
    groups: &[String],
) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, pipeline_id, name, paused, serial, serial_groups, max_in_flight,
               build_number, first_logged_build_id, latest_completed_build_id,
               next_build_id, transition_build_id, build_log_retention
        FROM jobs
        WHERE pipeline_id = $1 AND (serial_groups && $2 OR (serial AND name = ANY($2)))
        "#,
    )
    .bind(pipeline_id)
    .bind(groups)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    paused: bool,
    serial: bool,
    serial_groups: Vec<String>,
    max_in_flight: i32,
    build_number: i64,
    first_logged_build_id: Option<Uuid>,
    latest_completed_build_id: Option<Uuid>,
    next_build_id: Option<Uuid>,
    transition_build_id: Option<Uuid>,
    build_log_retention: Option<i32>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            paused: row.paused,
            serial: row.serial,
            serial_groups: row.serial_groups,
            max_in_flight: row.max_in_flight,
            build_number: row.build_number,
            first_logged_build_id: row.first_logged_build_id,
            latest_completed_build_id: row.latest_completed_build_id,
            next_build_id: row.next_build_id,
            transition_build_id: row.transition_build_id,
            build_log_retention: row.build_log_retention,
        }
    }
}
