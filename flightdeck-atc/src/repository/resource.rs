//! Resource repository

use flightdeck_core::config::ResourceConfig;
use flightdeck_core::domain::resource::Resource;
use sqlx::PgPool;
use uuid::Uuid;

/// Upsert a resource row from its config, preserving check state.
pub async fn sync_from_config(
    pool: &PgPool,
    pipeline_id: Uuid,
    config: &ResourceConfig,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO resources (id, pipeline_id, name, type, source, check_every)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (pipeline_id, name) DO UPDATE
        SET type = EXCLUDED.type,
            source = EXCLUDED.source,
            check_every = EXCLUDED.check_every
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(pipeline_id)
    .bind(&config.name)
    .bind(&config.resource_type)
    .bind(&config.source)
    .bind(&config.check_every)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove resources no longer present in the config; versions cascade.
pub async fn prune_removed(
    pool: &PgPool,
    pipeline_id: Uuid,
    keep_names: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM resources WHERE pipeline_id = $1 AND name <> ALL($2)")
        .bind(pipeline_id)
        .bind(keep_names)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Resource>, sqlx::Error> {
    let row = sqlx::query_as::<_, ResourceRow>(
        r#"
        SELECT id, pipeline_id, name, type, source, check_every, paused, check_error, last_checked
        FROM resources
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
) -> Result<Option<Resource>, sqlx::Error> {
    let row = sqlx::query_as::<_, ResourceRow>(
        r#"
        SELECT id, pipeline_id, name, type, source, check_every, paused, check_error, last_checked
        FROM resources
        WHERE pipeline_id = $1 AND name = $2
        "#,
    )
    .bind(pipeline_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn list_for_pipeline(
    pool: &PgPool,
    pipeline_id: Uuid,
) -> Result<Vec<Resource>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ResourceRow>(
        r#"
        SELECT id, pipeline_id, name, type, source, check_every, paused, check_error, last_checked
        FROM resources
        WHERE pipeline_id = $1
        ORDER BY name ASC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Record the outcome of a check. A successful check clears any previous
/// error; either way `last_checked` advances.
pub async fn set_check_result(
    pool: &PgPool,
    id: Uuid,
    check_error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE resources SET check_error = $2, last_checked = now() WHERE id = $1")
        .bind(id)
        .bind(check_error)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_paused(pool: &PgPool, id: Uuid, paused: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE resources SET paused = $2 WHERE id = $1")
        .bind(id)
        .bind(paused)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ResourceRow {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    #[sqlx(rename = "type")]
    resource_type: String,
    source: serde_json::Value,
    check_every: Option<String>,
    paused: bool,
    check_error: Option<String>,
    last_checked: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Resource {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            resource_type: row.resource_type,
            source: row.source,
            check_every: row.check_every,
            paused: row.paused,
            check_error: row.check_error,
            last_checked: row.last_checked,
        }
    }
}
