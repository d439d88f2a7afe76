//! Database pool and schema
//!
//! The schema migrates forward-only at startup. Migration runs under a
//! session advisory lock so that when several nodes race on boot, exactly one
//! applies DDL and the rest wait.

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

/// Advisory lock key for schema migration. Arbitrary but stable.
const MIGRATION_LOCK_KEY: i64 = 0x464c_4454;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    let result = apply_schema(pool).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *conn)
        .await?;

    result?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            team_id UUID NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            paused BOOLEAN NOT NULL DEFAULT FALSE,
            ordering INTEGER NOT NULL DEFAULT 0,
            config_version INTEGER NOT NULL DEFAULT 1,
            config JSONB NOT NULL,
            UNIQUE (team_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            paused BOOLEAN NOT NULL DEFAULT FALSE,
            serial BOOLEAN NOT NULL DEFAULT FALSE,
            serial_groups TEXT[] NOT NULL DEFAULT '{}',
            max_in_flight INTEGER NOT NULL DEFAULT 0,
            build_number BIGINT NOT NULL DEFAULT 0,
            first_logged_build_id UUID,
            latest_completed_build_id UUID,
            next_build_id UUID,
            transition_build_id UUID,
            build_log_retention INTEGER,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            type VARCHAR(255) NOT NULL,
            source JSONB NOT NULL DEFAULT '{}',
            check_every TEXT,
            paused BOOLEAN NOT NULL DEFAULT FALSE,
            check_error TEXT,
            last_checked TIMESTAMPTZ,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS versioned_resources (
            id BIGSERIAL PRIMARY KEY,
            resource_id UUID NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
            version JSONB NOT NULL,
            metadata JSONB NOT NULL DEFAULT '[]',
            check_order INTEGER NOT NULL,
            UNIQUE (resource_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versioned_resources_check_order \
         ON versioned_resources(resource_id, check_order DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            id UUID PRIMARY KEY,
            pipeline_id UUID REFERENCES pipelines(id) ON DELETE CASCADE,
            job_id UUID REFERENCES jobs(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            engine VARCHAR(255) NOT NULL DEFAULT '',
            engine_metadata TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            start_time TIMESTAMPTZ,
            end_time TIMESTAMPTZ,
            reap_time TIMESTAMPTZ,
            completed BOOLEAN NOT NULL DEFAULT FALSE,
            manually_triggered BOOLEAN NOT NULL DEFAULT FALSE,
            aborted BOOLEAN NOT NULL DEFAULT FALSE,
            drained BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_builds_job_created ON builds(job_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_inputs (
            build_id UUID NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            versioned_resource_id BIGINT NOT NULL REFERENCES versioned_resources(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            PRIMARY KEY (build_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_outputs (
            build_id UUID NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            versioned_resource_id BIGINT NOT NULL REFERENCES versioned_resources(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            PRIMARY KEY (build_id, versioned_resource_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_events (
            build_id UUID NOT NULL REFERENCES builds(id) ON DELETE CASCADE,
            event_id BIGINT NOT NULL,
            type VARCHAR(50) NOT NULL,
            payload JSONB NOT NULL DEFAULT '{}',
            ts TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (build_id, event_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS containers (
            handle VARCHAR(255) PRIMARY KEY,
            worker_name VARCHAR(255) NOT NULL,
            build_id UUID REFERENCES builds(id) ON DELETE SET NULL,
            plan_id TEXT,
            step_type VARCHAR(50) NOT NULL,
            step_name TEXT,
            pipeline_id UUID REFERENCES pipelines(id) ON DELETE SET NULL,
            resource_id UUID REFERENCES resources(id) ON DELETE SET NULL,
            working_directory TEXT NOT NULL DEFAULT '',
            ttl_seconds BIGINT,
            best_if_used_by TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_containers_step_identity \
         ON containers(build_id, plan_id, step_type, step_name)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_containers_check_identity \
         ON containers(pipeline_id, resource_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS volumes (
            handle VARCHAR(255) PRIMARY KEY,
            worker_name VARCHAR(255) NOT NULL,
            kind VARCHAR(50) NOT NULL,
            resource_type VARCHAR(255),
            version JSONB,
            source_hash VARCHAR(255),
            params_hash VARCHAR(255),
            parent_handle VARCHAR(255),
            output_name VARCHAR(255),
            import_path TEXT,
            ttl_seconds BIGINT,
            size_in_bytes BIGINT,
            initialized BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_volumes_cache_identity \
         ON volumes(worker_name, resource_type, source_hash, params_hash)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workers (
            name VARCHAR(255) PRIMARY KEY,
            addr VARCHAR(255) NOT NULL,
            volumes_addr VARCHAR(255),
            active_containers INTEGER NOT NULL DEFAULT 0,
            resource_types JSONB NOT NULL DEFAULT '[]',
            platform VARCHAR(255) NOT NULL DEFAULT '',
            tags TEXT[] NOT NULL DEFAULT '{}',
            start_time TIMESTAMPTZ NOT NULL,
            last_heartbeat TIMESTAMPTZ NOT NULL,
            state VARCHAR(50) NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leases (
            name VARCHAR(255) PRIMARY KEY,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Every pipeline belongs to a team; a fresh install gets `main`.
pub async fn create_default_team(pool: &PgPool) -> Result<Uuid, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO teams (id, name) VALUES ($1, 'main')
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .execute(pool)
    .await?;

    let (id,): (Uuid,) = sqlx::query_as("SELECT id FROM teams WHERE name = 'main'")
        .fetch_one(pool)
        .await?;

    Ok(id)
}
