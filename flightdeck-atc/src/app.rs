//! Shared component wiring
//!
//! One handle bundling the pool, the worker-facing components, and the
//! settings; everything long-running (syncer groups, trackers, reapers, API
//! handlers) borrows from here.

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AtcConfig;
use crate::engine::Engine;
use crate::worker_pool::{ResourceTracker, WorkerPool};

pub struct App {
    pub pool: PgPool,
    pub team_id: Uuid,
    pub workers: Arc<WorkerPool>,
    pub tracker: Arc<ResourceTracker>,
    pub engine: Arc<Engine>,
    pub settings: AtcConfig,
}
