//! Pipeline syncer
//!
//! Reconciles the set of active pipelines against in-memory runner groups
//! (radar + scheduler per pipeline). Groups are keyed by
//! `(pipeline_id, config_version)`, so pausing or deleting a pipeline stops
//! its group and a config save restarts it against the new config. Group
//! shutdown is synchronous: a replacement never starts until the old group
//! has fully stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use flightdeck_core::domain::pipeline::Pipeline;

use crate::app::App;
use crate::repository::pipeline as pipeline_repository;
use crate::supervisor::Supervisor;
use crate::{radar, scheduler};

const SYNC_INTERVAL: Duration = Duration::from_secs(10);

pub struct PipelineSyncer {
    app: Arc<App>,
    groups: HashMap<Uuid, RunningGroup>,
}

struct RunningGroup {
    pipeline_id: Uuid,
    pipeline_name: String,
    config_version: i32,
    supervisor: Supervisor,
}

impl PipelineSyncer {
    pub fn new(app: Arc<App>) -> Self {
        Self {
            app,
            groups: HashMap::new(),
        }
    }

    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(SYNC_INTERVAL);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.sync().await {
                error!("pipeline sync failed: {}", e);
            }
        }

        for (_, group) in self.groups.drain() {
            info!(pipeline = %group.pipeline_name, "stopping pipeline group");
            group.supervisor.shutdown().await;
        }
    }

    async fn sync(&mut self) -> Result<(), sqlx::Error> {
        let active = pipeline_repository::list_active(&self.app.pool).await?;

        let desired: HashMap<Uuid, i32> = active
            .iter()
            .map(|p| (p.id, p.config_version))
            .collect();

        // Stop groups for removed or paused pipelines and for stale config
        // versions, waiting each one out before anything else starts.
        let stale: Vec<Uuid> = self
            .groups
            .iter()
            .filter(|(id, group)| desired.get(id) != Some(&group.config_version))
            .map(|(id, _)| *id)
            .collect();

        for id in stale {
            if let Some(group) = self.groups.remove(&id) {
                info!(pipeline = %group.pipeline_name, "stopping pipeline group");
                group.supervisor.shutdown().await;
            }
        }

        for pipeline in active {
            if !self.groups.contains_key(&pipeline.id) {
                info!(pipeline = %pipeline.name, "starting pipeline group");
                let group = self.start_group(pipeline);
                self.groups.insert(group.pipeline_id, group);
            }
        }

        Ok(())
    }

    fn start_group(&self, pipeline: Pipeline) -> RunningGroup {
        let mut supervisor = Supervisor::new();

        let radar_app = Arc::clone(&self.app);
        let radar_pipeline = pipeline.clone();
        supervisor.spawn("radar", move |token| {
            radar::run(radar_app, radar_pipeline, token)
        });

        let scheduler_app = Arc::clone(&self.app);
        let scheduler_pipeline = pipeline.clone();
        supervisor.spawn("scheduler", move |token| {
            scheduler::run(scheduler_app, scheduler_pipeline, token)
        });

        RunningGroup {
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name,
            config_version: pipeline.config_version,
            supervisor,
        }
    }
}
