//! Versioned resource repository
//!
//! `check_order` assignment happens under `SELECT ... FOR UPDATE` on the
//! resource row, so two concurrent scanners can never hand out colliding
//! orders. Versions within one check are stored in the order the resource
//! reported them (oldest first), and re-reporting a known version is a no-op
//! thanks to the unique `(resource_id, version)` constraint.

use flightdeck_core::domain::version::{MetadataField, Version, VersionedResource};
use sqlx::PgPool;
use uuid::Uuid;

/// Persist newly discovered versions, assigning each a fresh `check_order`
/// strictly greater than the resource's current maximum. Returns how many
/// were actually new.
pub async fn save_versions(
    pool: &PgPool,
    resource_id: Uuid,
    versions: &[Version],
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Serialize check_order assignment per resource.
    sqlx::query("SELECT id FROM resources WHERE id = $1 FOR UPDATE")
        .bind(resource_id)
        .fetch_one(&mut *tx)
        .await?;

    let (mut order,): (i32,) = sqlx::query_as(
        "SELECT COALESCE(MAX(check_order), 0) FROM versioned_resources WHERE resource_id = $1",
    )
    .bind(resource_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut inserted = 0;

    for version in versions {
        let result = sqlx::query(
            r#"
            INSERT INTO versioned_resources (resource_id, version, metadata, check_order)
            VALUES ($1, $2, '[]', $3)
            ON CONFLICT (resource_id, version) DO NOTHING
            "#,
        )
        .bind(resource_id)
        .bind(serde_json::to_value(version).unwrap_or_default())
        .bind(order + 1)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            order += 1;
            inserted += 1;
        }
    }

    tx.commit().await?;

    Ok(inserted)
}

/// Attach display metadata to a version, typically after a get or put
/// reported it.
pub async fn save_metadata(
    pool: &PgPool,
    versioned_resource_id: i64,
    metadata: &[MetadataField],
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE versioned_resources SET metadata = $2 WHERE id = $1")
        .bind(versioned_resource_id)
        .bind(serde_json::to_value(metadata).unwrap_or_default())
        .execute(pool)
        .await?;

    Ok(())
}

/// The version with the highest check_order, i.e. the newest known.
pub async fn latest(
    pool: &PgPool,
    resource_id: Uuid,
) -> Result<Option<VersionedResource>, sqlx::Error> {
    let row = sqlx::query_as::<_, VersionedResourceRow>(
        r#"
        SELECT id, resource_id, version, metadata, check_order
        FROM versioned_resources
        WHERE resource_id = $1
        ORDER BY check_order DESC
        LIMIT 1
        "#,
    )
    .bind(resource_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<VersionedResource>, sqlx::Error> {
    let row = sqlx::query_as::<_, VersionedResourceRow>(
        r#"
        SELECT id, resource_id, version, metadata, check_order
        FROM versioned_resources
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_version(
    pool: &PgPool,
    resource_id: Uuid,
    version: &Version,
) -> Result<Option<VersionedResource>, sqlx::Error> {
    let row = sqlx::query_as::<_, VersionedResourceRow>(
        r#"
        SELECT id, resource_id, version, metadata, check_order
        FROM versioned_resources
        WHERE resource_id = $1 AND version = $2
        "#,
    )
    .bind(resource_id)
    .bind(serde_json::to_value(version).unwrap_or_default())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Newest-first candidate versions for input resolution, bounded so the
/// solver never loads unbounded history.
pub async fn candidates(
    pool: &PgPool,
    resource_id: Uuid,
    limit: i64,
) -> Result<Vec<VersionedResource>, sqlx::Error> {
    let rows = sqlx::query_as::<_, VersionedResourceRow>(
        r#"
        SELECT id, resource_id, version, metadata, check_order
        FROM versioned_resources
        WHERE resource_id = $1
        ORDER BY check_order DESC
        LIMIT $2
        "#,
    )
    .bind(resource_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Versioned resource ids already consumed by any build of the job, for the
/// `every` strategy's "oldest unbuilt" selection.
pub async fn built_version_ids(
    pool: &PgPool,
    job_id: Uuid,
    resource_id: Uuid,
) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT vr.id
        FROM versioned_resources vr
        JOIN build_inputs bi ON bi.versioned_resource_id = vr.id
        JOIN builds b ON b.id = bi.build_id
        WHERE b.job_id = $1 AND vr.resource_id = $2
        "#,
    )
    .bind(job_id)
    .bind(resource_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// For passed-constraint solving: pairs of (versioned_resource_id, build_id)
/// where the build belongs to the upstream job, succeeded, and used that
/// version of the resource. "Used" covers both directions: versions the build
/// consumed as inputs and versions its put steps produced as outputs, so a
/// job that publishes a resource satisfies downstream `passed` constraints on
/// it.
pub async fn versions_used_by_succeeded_builds(
    pool: &PgPool,
    upstream_job_id: Uuid,
    resource_id: Uuid,
) -> Result<Vec<(i64, Uuid)>, sqlx::Error> {
    let rows: Vec<(i64, Uuid)> = sqlx::query_as(
        r#"
        SELECT vr.id, b.id
        FROM versioned_resources vr
        JOIN build_inputs bi ON bi.versioned_resource_id = vr.id
        JOIN builds b ON b.id = bi.build_id
        WHERE b.job_id = $1 AND b.status = 'succeeded' AND vr.resource_id = $2
        UNION
        SELECT vr.id, b.id
        FROM versioned_resources vr
        JOIN build_outputs bo ON bo.versioned_resource_id = vr.id
        JOIN builds b ON b.id = bo.build_id
        WHERE b.job_id = $1 AND b.status = 'succeeded' AND vr.resource_id = $2
        "#,
    )
    .bind(upstream_job_id)
    .bind(resource_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct VersionedResourceRow {
    id: i64,
    resource_id: Uuid,
    version: serde_json::Value,
    metadata: serde_json::Value,
    check_order: i32,
}

impl From<VersionedResourceRow> for VersionedResource {
    fn from(row: VersionedResourceRow) -> Self {
        VersionedResource {
            id: row.id,
            resource_id: row.resource_id,
            version: serde_json::from_value(row.version).unwrap_or_default(),
            metadata: serde_json::from_value(row.metadata).unwrap_or_default(),
            check_order: row.check_order,
        }
    }
}
