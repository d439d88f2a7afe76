//! Build event repository
//!
//! Append-only per-build streams. Event ids are assigned per build so
//! consumers can replay from the last id they saw; each append also notifies
//! the build's channel so tailing consumers wake without polling.

use flightdeck_core::domain::event::{BuildEvent, EventType};
use sqlx::PgPool;
use uuid::Uuid;

/// Append one event and notify the build's channel. Returns the assigned
/// event id.
pub async fn save(
    pool: &PgPool,
    build_id: Uuid,
    event_type: EventType,
    payload: serde_json::Value,
) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let (event_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO build_events (build_id, event_id, type, payload, ts)
        SELECT $1, COALESCE(MAX(event_id), 0) + 1, $2, $3, now()
        FROM build_events
        WHERE build_id = $1
        RETURNING event_id
        "#,
    )
    .bind(build_id)
    .bind(event_type.as_str())
    .bind(payload)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(notify_channel(build_id))
        .bind(event_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(event_id)
}

/// Events with `event_id > from`, in order.
pub async fn events_from(
    pool: &PgPool,
    build_id: Uuid,
    from: i64,
) -> Result<Vec<BuildEvent>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT build_id, event_id, type, payload, ts
        FROM build_events
        WHERE build_id = $1 AND event_id > $2
        ORDER BY event_id ASC
        "#,
    )
    .bind(build_id)
    .bind(from)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.into_event()).collect())
}

/// Drop a build's event rows (the build reaper's log truncation).
pub async fn delete_for_build(pool: &PgPool, build_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM build_events WHERE build_id = $1")
        .bind(build_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// The notification channel new events are announced on.
pub fn notify_channel(build_id: Uuid) -> String {
    format!("build_events_{}", build_id.simple())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    build_id: Uuid,
    event_id: i64,
    #[sqlx(rename = "type")]
    event_type: String,
    payload: serde_json::Value,
    ts: chrono::DateTime<chrono::Utc>,
}

impl EventRow {
    /// Rows with an unknown type are skipped rather than failing the whole
    /// tail; newer nodes may write kinds this one doesn't know.
    fn into_event(self) -> Option<BuildEvent> {
        let event_type = EventType::from_str(&self.event_type)?;

        Some(BuildEvent {
            build_id: self.build_id,
            event_id: self.event_id,
            event_type,
            payload: self.payload,
            ts: self.ts,
        })
    }
}
