//! Build reaper
//!
//! Per job, keeps the newest N completed builds' logs (N from the job's
//! `build_log_retention`, falling back to the configured default) and reaps
//! the rest: `reap_time` is set and the event rows are deleted. Build rows
//! themselves stay for history.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::app::App;
use crate::repository::{
    build as build_repository, event as event_repository, job as job_repository,
    pipeline as pipeline_repository,
};

use super::lease_runner::Collector;

pub struct BuildReaper {
    app: Arc<App>,
}

impl BuildReaper {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }
}

/// How many builds a job keeps logs for.
pub fn retention_for(job_override: Option<i32>, default: u32) -> i64 {
    match job_override {
        Some(n) if n > 0 => n as i64,
        _ => default as i64,
    }
}

#[async_trait]
impl Collector for BuildReaper {
    async fn collect(&self) -> anyhow::Result<()> {
        let pool = &self.app.pool;
        let default = self.app.settings.build_log_retention;

        let mut reaped = 0u64;

        for pipeline in pipeline_repository::list_all(pool).await? {
            for job in job_repository::list_for_pipeline(pool, pipeline.id).await? {
                let keep = retention_for(job.build_log_retention, default);

                for build in build_repository::reapable_for_job(pool, job.id, keep).await? {
                    reaped += event_repository::delete_for_build(pool, build.id).await?;
                    build_repository::set_reap_time(pool, build.id).await?;
                }
            }
        }

        if reaped > 0 {
            info!(events = reaped, "reaped old build logs");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_override_wins_when_positive() {
        assert_eq!(retention_for(Some(10), 500), 10);
        assert_eq!(retention_for(Some(0), 500), 500);
        assert_eq!(retention_for(None, 500), 500);
    }
}
