//! Pipeline repository

use flightdeck_core::config::PipelineConfig;
use flightdeck_core::domain::pipeline::Pipeline;
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a new pipeline at the end of the ordering.
pub async fn create(
    pool: &PgPool,
    team_id: Uuid,
    name: &str,
    config: &PipelineConfig,
) -> Result<Pipeline, sqlx::Error> {
    let id = Uuid::new_v4();

    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        INSERT INTO pipelines (id, team_id, name, paused, ordering, config_version, config)
        VALUES (
            $1, $2, $3, FALSE,
            (SELECT COALESCE(MAX(ordering), 0) + 1 FROM pipelines WHERE team_id = $2),
            1, $4
        )
        RETURNING id, team_id, name, paused, ordering, config_version, config
        "#,
    )
    .bind(id)
    .bind(team_id)
    .bind(name)
    .bind(serde_json::to_value(config).unwrap_or_default())
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Compare-and-swap config update. Returns the new config version, or None
/// when `expected_version` lost the race.
pub async fn update_config(
    pool: &PgPool,
    id: Uuid,
    config: &PipelineConfig,
    expected_version: i32,
) -> Result<Option<i32>, sqlx::Error> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        UPDATE pipelines
        SET config = $2, config_version = config_version + 1
        WHERE id = $1 AND config_version = $3
        RETURNING config_version
        "#,
    )
    .bind(id)
    .bind(serde_json::to_value(config).unwrap_or_default())
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(v,)| v))
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, team_id, name, paused, ordering, config_version, config
        FROM pipelines
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
    team_id: Uuid,
    name: &str,
) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, team_id, name, paused, ordering, config_version, config
        FROM pipelines
        WHERE team_id = $1 AND name = $2
        "#,
    )
    .bind(team_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// All pipelines in display/sync order.
pub async fn list_all(pool: &PgPool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, team_id, name, paused, ordering, config_version, config
        FROM pipelines
        ORDER BY ordering ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Unpaused pipelines in sync order; this is the set the syncer keeps runner
/// groups for.
pub async fn list_active(pool: &PgPool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, team_id, name, paused, ordering, config_version, config
        FROM pipelines
        WHERE paused = FALSE
        ORDER BY ordering ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn set_paused(pool: &PgPool, id: Uuid, paused: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE pipelines SET paused = $2 WHERE id = $1")
        .bind(id)
        .bind(paused)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a pipeline; jobs, resources, and versions cascade.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    team_id: Uuid,
    name: String,
    paused: bool,
    ordering: i32,
    config_version: i32,
    config: serde_json::Value,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        let config = serde_json::from_value(row.config).unwrap_or_default();

        Pipeline {
            id: row.id,
            team_id: row.team_id,
            name: row.name,
            paused: row.paused,
            ordering: row.ordering,
            config_version: row.config_version,
            config,
        }
    }
}
