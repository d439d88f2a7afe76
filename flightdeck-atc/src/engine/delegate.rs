//! Build delegate
//!
//! Persists per-step lifecycle events as the build's append-only stream and
//! finalizes the build exactly once. This stream is what the UI and the
//! syslog drainer tail.

use sqlx::PgPool;
use uuid::Uuid;

use flightdeck_core::domain::build::BuildStatus;
use flightdeck_core::domain::event::{EventOrigin, EventType};

use crate::repository::{build as build_repository, event as event_repository, job as job_repository};

pub struct BuildDelegate {
    pool: PgPool,
    build_id: Uuid,
}

impl BuildDelegate {
    pub fn new(pool: PgPool, build_id: Uuid) -> Self {
        Self { pool, build_id }
    }

    pub async fn initialize(&self, origin: &EventOrigin) -> Result<(), sqlx::Error> {
        self.save(
            EventType::Initialize,
            serde_json::json!({ "origin": origin }),
        )
        .await
    }

    pub async fn start(&self, origin: &EventOrigin) -> Result<(), sqlx::Error> {
        self.save(EventType::Start, serde_json::json!({ "origin": origin }))
            .await
    }

    pub async fn finish(&self, origin: &EventOrigin, exit_status: i32) -> Result<(), sqlx::Error> {
        self.save(
            EventType::Finish,
            serde_json::json!({ "origin": origin, "exit_status": exit_status }),
        )
        .await
    }

    pub async fn log(&self, origin: &EventOrigin, line: &str) -> Result<(), sqlx::Error> {
        self.save(
            EventType::Log,
            serde_json::json!({ "origin": origin, "payload": line }),
        )
        .await
    }

    /// A fault, step-scoped when an origin is known.
    pub async fn error(
        &self,
        origin: Option<&EventOrigin>,
        message: &str,
    ) -> Result<(), sqlx::Error> {
        let payload = match origin {
            Some(origin) => serde_json::json!({ "origin": origin, "message": message }),
            None => serde_json::json!({ "message": message }),
        };
        self.save(EventType::Error, payload).await
    }

    /// Finalize the build: terminal row state, the single `status` event, and
    /// the owning job's history pointers. A build some other finalizer
    /// already completed is left untouched, so the terminal event is written
    /// exactly once even when trackers race.
    pub async fn finish_build(&self, status: BuildStatus) -> Result<(), sqlx::Error> {
        if !build_repository::finish(&self.pool, self.build_id, status).await? {
            return Ok(());
        }

        self.save(
            EventType::Status,
            serde_json::json!({ "status": status.to_string() }),
        )
        .await?;

        let Some(build) = build_repository::find_by_id(&self.pool, self.build_id).await? else {
            return Ok(());
        };

        if let Some(job_id) = build.job_id {
            let previous_status = match job_repository::find_by_id(&self.pool, job_id).await? {
                Some(job) => match job.latest_completed_build_id {
                    Some(prev_id) if prev_id != self.build_id => {
                        build_repository::find_by_id(&self.pool, prev_id)
                            .await?
                            .map(|b| b.status)
                    }
                    _ => None,
                },
                None => None,
            };

            let status_changed = previous_status != Some(status);
            job_repository::record_completed_build(&self.pool, job_id, self.build_id, status_changed)
                .await?;
        }

        Ok(())
    }

    async fn save(
        &self,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        event_repository::save(&self.pool, self.build_id, event_type, payload).await?;
        Ok(())
    }
}
