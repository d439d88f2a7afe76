//! Worker repository
//!
//! Registration is an upsert refreshed by heartbeats; a worker whose
//! heartbeat goes stale is flipped to `stalled` and stops receiving work
//! until it reports in again.

use flightdeck_core::domain::worker::{Worker, WorkerState};
use flightdeck_core::dto::worker::RegisterWorkerRequest;
use sqlx::PgPool;
use std::time::Duration;

pub async fn register(pool: &PgPool, req: &RegisterWorkerRequest) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workers
            (name, addr, volumes_addr, active_containers, resource_types, platform, tags,
             start_time, last_heartbeat, state)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now(), 'running')
        ON CONFLICT (name) DO UPDATE
        SET addr = EXCLUDED.addr,
            volumes_addr = EXCLUDED.volumes_addr,
            active_containers = EXCLUDED.active_containers,
            resource_types = EXCLUDED.resource_types,
            platform = EXCLUDED.platform,
            tags = EXCLUDED.tags,
            last_heartbeat = now(),
            state = 'running'
        "#,
    )
    .bind(&req.name)
    .bind(&req.addr)
    .bind(&req.volumes_addr)
    .bind(req.active_containers)
    .bind(serde_json::to_value(&req.resource_types).unwrap_or_default())
    .bind(&req.platform)
    .bind(&req.tags)
    .execute(pool)
    .await?;

    Ok(())
}

/// Refresh liveness and the container count. Returns false for an unknown
/// worker, which tells the agent to re-register.
pub async fn heartbeat(
    pool: &PgPool,
    name: &str,
    active_containers: i32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE workers
        SET active_containers = $2, last_heartbeat = now(),
            state = CASE WHEN state = 'stalled' THEN 'running' ELSE state END
        WHERE name = $1
        "#,
    )
    .bind(name)
    .bind(active_containers)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Worker>, sqlx::Error> {
    let row = sqlx::query_as::<_, WorkerRow>(
        r#"
        SELECT name, addr, volumes_addr, active_containers, resource_types, platform, tags,
               start_time, state
        FROM workers
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
    let rows = sqlx::query_as::<_, WorkerRow>(
        r#"
        SELECT name, addr, volumes_addr, active_containers, resource_types, platform, tags,
               start_time, state
        FROM workers
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn list_running(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
    let rows = sqlx::query_as::<_, WorkerRow>(
        r#"
        SELECT name, addr, volumes_addr, active_containers, resource_types, platform, tags,
               start_time, state
        FROM workers
        WHERE state = 'running'
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Move a worker through its lifecycle (landing, retiring, ...). Returns
/// false for an unknown worker.
pub async fn set_state(pool: &PgPool, name: &str, state: WorkerState) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE workers SET state = $2 WHERE name = $1")
        .bind(name)
        .bind(state.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark workers whose heartbeat is older than the threshold as stalled.
pub async fn stall_unresponsive(
    pool: &PgPool,
    threshold: Duration,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE workers
        SET state = 'stalled'
        WHERE state = 'running'
          AND last_heartbeat < now() - make_interval(secs => $1)
        "#,
    )
    .bind(threshold.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn string_to_state(s: &str) -> WorkerState {
    match s {
        "running" => WorkerState::Running,
        "stalled" => WorkerState::Stalled,
        "landing" => WorkerState::Landing,
        "landed" => WorkerState::Landed,
        "retiring" => WorkerState::Retiring,
        _ => WorkerState::Stalled,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct WorkerRow {
    name: String,
    addr: String,
    volumes_addr: Option<String>,
    active_containers: i32,
    resource_types: serde_json::Value,
    platform: String,
    tags: Vec<String>,
    start_time: chrono::DateTime<chrono::Utc>,
    state: String,
}

impl From<WorkerRow> for Worker {
    fn from(row: WorkerRow) -> Self {
        Worker {
            name: row.name,
            addr: row.addr,
            volumes_addr: row.volumes_addr,
            active_containers: row.active_containers,
            resource_types: serde_json::from_value(row.resource_types).unwrap_or_default(),
            platform: row.platform,
            tags: row.tags,
            start_time: row.start_time,
            state: string_to_state(&row.state),
        }
    }
}
