//! Volume repository
//!
//! Cache volumes are found by their fingerprint `(worker, resource_type,
//! source_hash, params_hash, version)`; only rows marked `initialized` are
//! trusted for reuse.

use flightdeck_core::domain::version::Version;
use flightdeck_core::domain::volume::{Volume, VolumeIdentifier};
use sqlx::PgPool;

pub async fn insert(pool: &PgPool, volume: &Volume) -> Result<(), sqlx::Error> {
    let cols = IdentifierColumns::from(&volume.identifier);

    sqlx::query(
        r#"
        INSERT INTO volumes
            (handle, worker_name, kind, resource_type, version, source_hash, params_hash,
             parent_handle, output_name, import_path, ttl_seconds, size_in_bytes, initialized)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&volume.handle)
    .bind(&volume.worker_name)
    .bind(cols.kind)
    .bind(cols.resource_type)
    .bind(cols.version)
    .bind(cols.source_hash)
    .bind(cols.params_hash)
    .bind(cols.parent_handle)
    .bind(cols.output_name)
    .bind(cols.import_path)
    .bind(volume.ttl_seconds)
    .bind(volume.size_in_bytes)
    .bind(volume.initialized)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a cache volume for the fingerprint on the given worker.
pub async fn find_cache_on_worker(
    pool: &PgPool,
    worker_name: &str,
    resource_type: &str,
    version: &Version,
    source_hash: &str,
    params_hash: &str,
) -> Result<Option<Volume>, sqlx::Error> {
    let row = sqlx::query_as::<_, VolumeRow>(
        r#"
        SELECT handle, worker_name, kind, resource_type, version, source_hash, params_hash,
               parent_handle, output_name, import_path, ttl_seconds, size_in_bytes, initialized
        FROM volumes
        WHERE worker_name = $1 AND kind = 'resource_cache'
          AND resource_type = $2 AND version = $3 AND source_hash = $4 AND params_hash = $5
        "#,
    )
    .bind(worker_name)
    .bind(resource_type)
    .bind(serde_json::to_value(version).unwrap_or_default())
    .bind(source_hash)
    .bind(params_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| r.into_volume()))
}

/// Every cache volume for the fingerprint, across all workers. Placement uses
/// this to co-locate work with an existing cache.
pub async fn find_caches(
    pool: &PgPool,
    resource_type: &str,
    version: &Version,
    source_hash: &str,
    params_hash: &str,
) -> Result<Vec<Volume>, sqlx::Error> {
    let rows = sqlx::query_as::<_, VolumeRow>(
        r#"
        SELECT handle, worker_name, kind, resource_type, version, source_hash, params_hash,
               parent_handle, output_name, import_path, ttl_seconds, size_in_bytes, initialized
        FROM volumes
        WHERE kind = 'resource_cache'
          AND resource_type = $1 AND version = $2 AND source_hash = $3 AND params_hash = $4
        "#,
    )
    .bind(resource_type)
    .bind(serde_json::to_value(version).unwrap_or_default())
    .bind(source_hash)
    .bind(params_hash)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.into_volume()).collect())
}

/// The workers currently holding each of the given volume handles, for
/// locality-aware placement.
pub async fn locate(
    pool: &PgPool,
    handles: &[String],
) -> Result<Vec<(String, String)>, sqlx::Error> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT handle, worker_name FROM volumes WHERE handle = ANY($1)")
            .bind(handles)
            .fetch_all(pool)
            .await?;

    Ok(rows)
}

/// Find an output volume by its scoped name (`{build_id}:{plan_id}:{output}`),
/// the reattach path for resumed task steps.
pub async fn find_output(pool: &PgPool, name: &str) -> Result<Option<Volume>, sqlx::Error> {
    let row = sqlx::query_as::<_, VolumeRow>(
        r#"
        SELECT handle, worker_name, kind, resource_type, version, source_hash, params_hash,
               parent_handle, output_name, import_path, ttl_seconds, size_in_bytes, initialized
        FROM volumes
        WHERE kind = 'output' AND output_name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| r.into_volume()))
}

pub async fn find_by_handle(pool: &PgPool, handle: &str) -> Result<Option<Volume>, sqlx::Error> {
    let row = sqlx::query_as::<_, VolumeRow>(
        r#"
        SELECT handle, worker_name, kind, resource_type, version, source_hash, params_hash,
               parent_handle, output_name, import_path, ttl_seconds, size_in_bytes, initialized
        FROM volumes
        WHERE handle = $1
        "#,
    )
    .bind(handle)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| r.into_volume()))
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<Volume>, sqlx::Error> {
    let rows = sqlx::query_as::<_, VolumeRow>(
        r#"
        SELECT handle, worker_name, kind, resource_type, version, source_hash, params_hash,
               parent_handle, output_name, import_path, ttl_seconds, size_in_bytes, initialized
        FROM volumes
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.into_volume()).collect())
}

/// Volume ages, for the lost-and-found's grace-period math.
pub async fn created_at_map(
    pool: &PgPool,
) -> Result<Vec<(String, chrono::DateTime<chrono::Utc>)>, sqlx::Error> {
    sqlx::query_as("SELECT handle, created_at FROM volumes")
        .fetch_all(pool)
        .await
}

/// Flip a cache to trustworthy after a successful get.
pub async fn set_initialized(pool: &PgPool, handle: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE volumes SET initialized = TRUE WHERE handle = $1")
        .bind(handle)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn refresh_ttl(pool: &PgPool, handle: &str, ttl_seconds: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE volumes SET ttl_seconds = $2 WHERE handle = $1")
        .bind(handle)
        .bind(ttl_seconds)
        .execute(pool)
        .await?;

    Ok(())
}

/// Zero the recorded TTL; the worker performs the actual deletion.
pub async fn mark_expired(pool: &PgPool, handle: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE volumes SET ttl_seconds = 0 WHERE handle = $1")
        .bind(handle)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn delete(pool: &PgPool, handle: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM volumes WHERE handle = $1")
        .bind(handle)
        .execute(pool)
        .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

struct IdentifierColumns {
    kind: &'static str,
    resource_type: Option<String>,
    version: Option<serde_json::Value>,
    source_hash: Option<String>,
    params_hash: Option<String>,
    parent_handle: Option<String>,
    output_name: Option<String>,
    import_path: Option<String>,
}

impl From<&VolumeIdentifier> for IdentifierColumns {
    fn from(identifier: &VolumeIdentifier) -> Self {
        let mut cols = IdentifierColumns {
            kind: "",
            resource_type: None,
            version: None,
            source_hash: None,
            params_hash: None,
            parent_handle: None,
            output_name: None,
            import_path: None,
        };

        match identifier {
            VolumeIdentifier::ResourceCache {
                resource_type,
                version,
                source_hash,
                params_hash,
            } => {
                cols.kind = "resource_cache";
                cols.resource_type = Some(resource_type.clone());
                cols.version = Some(serde_json::to_value(version).unwrap_or_default());
                cols.source_hash = Some(source_hash.clone());
                cols.params_hash = Some(params_hash.clone());
            }
            VolumeIdentifier::CopyOnWrite { parent_handle } => {
                cols.kind = "copy_on_write";
                cols.parent_handle = Some(parent_handle.clone());
            }
            VolumeIdentifier::Output { name } => {
                cols.kind = "output";
                cols.output_name = Some(name.clone());
            }
            VolumeIdentifier::Import { path } => {
                cols.kind = "import";
                cols.import_path = Some(path.clone());
            }
        }

        cols
    }
}

#[derive(sqlx::FromRow)]
struct VolumeRow {
    handle: String,
    worker_name: String,
    kind: String,
    resource_type: Option<String>,
    version: Option<serde_json::Value>,
    source_hash: Option<String>,
    params_hash: Option<String>,
    parent_handle: Option<String>,
    output_name: Option<String>,
    import_path: Option<String>,
    ttl_seconds: Option<i64>,
    size_in_bytes: Option<i64>,
    initialized: bool,
}

impl VolumeRow {
    fn into_volume(self) -> Option<Volume> {
        let identifier = match self.kind.as_str() {
            "resource_cache" => VolumeIdentifier::ResourceCache {
                resource_type: self.resource_type?,
                version: serde_json::from_value(self.version?).ok()?,
                source_hash: self.source_hash?,
                params_hash: self.params_hash?,
            },
            "copy_on_write" => VolumeIdentifier::CopyOnWrite {
                parent_handle: self.parent_handle?,
            },
            "output" => VolumeIdentifier::Output {
                name: self.output_name?,
            },
            "import" => VolumeIdentifier::Import {
                path: self.import_path?,
            },
            _ => return None,
        };

        Some(Volume {
            handle: self.handle,
            worker_name: self.worker_name,
            identifier,
            ttl_seconds: self.ttl_seconds,
            size_in_bytes: self.size_in_bytes,
            initialized: self.initialized,
        })
    }
}
