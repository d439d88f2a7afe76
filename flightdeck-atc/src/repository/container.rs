//! Container repository
//!
//! The control plane's record of containers on workers. The identity columns
//! are what `find_for_identifier` keys on; the worker-side handle is assigned
//! by the control plane so a row always names its remote counterpart.

use flightdeck_core::domain::container::{Container, ContainerIdentifier, StepType};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn insert(pool: &PgPool, container: &Container) -> Result<(), sqlx::Error> {
    let (build_id, plan_id, step_type, step_name, pipeline_id, resource_id) =
        identity_columns(&container.identifier);

    sqlx::query(
        r#"
        INSERT INTO containers
            (handle, worker_name, build_id, plan_id, step_type, step_name,
             pipeline_id, resource_id, working_directory, ttl_seconds, best_if_used_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                CASE WHEN $10 IS NULL THEN NULL
                     ELSE now() + make_interval(secs => $10::double precision) END)
        "#,
    )
    .bind(&container.handle)
    .bind(&container.worker_name)
    .bind(build_id)
    .bind(plan_id)
    .bind(step_type.to_string())
    .bind(step_name)
    .bind(pipeline_id)
    .bind(resource_id)
    .bind(&container.working_directory)
    .bind(container.ttl_seconds)
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up an existing container matching the identity tuple. This is what
/// makes resume correct: a resumed step finds its still-running container.
pub async fn find_for_identifier(
    pool: &PgPool,
    identifier: &ContainerIdentifier,
) -> Result<Option<Container>, sqlx::Error> {
    let row = match identifier {
        ContainerIdentifier::Step {
            build_id,
            plan_id,
            step_type,
            step_name,
        } => {
            sqlx::query_as::<_, ContainerRow>(
                r#"
                SELECT handle, worker_name, build_id, plan_id, step_type, step_name,
                       pipeline_id, resource_id, working_directory, ttl_seconds, best_if_used_by
                FROM containers
                WHERE build_id = $1 AND plan_id = $2 AND step_type = $3 AND step_name = $4
                "#,
            )
            .bind(build_id)
            .bind(plan_id)
            .bind(step_type.to_string())
            .bind(step_name)
            .fetch_optional(pool)
            .await?
        }
        ContainerIdentifier::Check {
            pipeline_id,
            resource_id,
        } => {
            sqlx::query_as::<_, ContainerRow>(
                r#"
                SELECT handle, worker_name, build_id, plan_id, step_type, step_name,
                       pipeline_id, resource_id, working_directory, ttl_seconds, best_if_used_by
                FROM containers
                WHERE pipeline_id = $1 AND resource_id = $2 AND step_type = 'check'
                "#,
            )
            .bind(pipeline_id)
            .bind(resource_id)
            .fetch_optional(pool)
            .await?
        }
    };

    Ok(row.and_then(|r| r.into_container()))
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<Container>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ContainerRow>(
        r#"
        SELECT handle, worker_name, build_id, plan_id, step_type, step_name,
               pipeline_id, resource_id, working_directory, ttl_seconds, best_if_used_by
        FROM containers
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.into_container()).collect())
}

/// Push a container's expiry out; any live build step referencing it calls
/// this as a side effect of reuse.
pub async fn refresh_ttl(pool: &PgPool, handle: &str, ttl_seconds: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE containers
        SET ttl_seconds = $2,
            best_if_used_by = now() + make_interval(secs => $2::double precision)
        WHERE handle = $1
        "#,
    )
    .bind(handle)
    .bind(ttl_seconds)
    .execute(pool)
    .await?;

    Ok(())
}

/// Zero the recorded TTL; the worker performs the actual deletion.
pub async fn mark_expired(pool: &PgPool, handle: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE containers SET ttl_seconds = 0, best_if_used_by = now() WHERE handle = $1",
    )
    .bind(handle)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete(pool: &PgPool, handle: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM containers WHERE handle = $1")
        .bind(handle)
        .execute(pool)
        .await?;

    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

type IdentityColumns = (
    Option<Uuid>,
    Option<String>,
    StepType,
    Option<String>,
    Option<Uuid>,
    Option<Uuid>,
);

fn identity_columns(identifier: &ContainerIdentifier) -> IdentityColumns {
    match identifier {
        ContainerIdentifier::Step {
            build_id,
            plan_id,
            step_type,
            step_name,
        } => (
            Some(*build_id),
            Some(plan_id.clone()),
            *step_type,
            Some(step_name.clone()),
            None,
            None,
        ),
        ContainerIdentifier::Check {
            pipeline_id,
            resource_id,
        } => (
            None,
            None,
            StepType::Check,
            None,
            Some(*pipeline_id),
            Some(*resource_id),
        ),
    }
}

fn string_to_step_type(s: &str) -> Option<StepType> {
    match s {
        "check" => Some(StepType::Check),
        "get" => Some(StepType::Get),
        "put" => Some(StepType::Put),
        "task" => Some(StepType::Task),
        _ => None,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ContainerRow {
    handle: String,
    worker_name: String,
    build_id: Option<Uuid>,
    plan_id: Option<String>,
    step_type: String,
    step_name: Option<String>,
    pipeline_id: Option<Uuid>,
    resource_id: Option<Uuid>,
    working_directory: String,
    ttl_seconds: Option<i64>,
    best_if_used_by: Option<chrono::DateTime<chrono::Utc>>,
}

impl ContainerRow {
    fn into_container(self) -> Option<Container> {
        let step_type = string_to_step_type(&self.step_type)?;

        let identifier = match (self.build_id, self.pipeline_id, self.resource_id) {
            (Some(build_id), _, _) => ContainerIdentifier::Step {
                build_id,
                plan_id: self.plan_id?,
                step_type,
                step_name: self.step_name?,
            },
            (None, Some(pipeline_id), Some(resource_id)) => ContainerIdentifier::Check {
                pipeline_id,
                resource_id,
            },
            _ => return None,
        };

        Some(Container {
            handle: self.handle,
            worker_name: self.worker_name,
            identifier,
            working_directory: self.working_directory,
            ttl_seconds: self.ttl_seconds,
            best_if_used_by: self.best_if_used_by,
        })
    }
}
