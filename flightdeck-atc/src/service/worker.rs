//! Worker service
//!
//! Registration, heartbeats, and the stall sweep that takes unresponsive
//! workers out of placement rotation.

use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flightdeck_core::domain::worker::{Worker, WorkerState};
use flightdeck_core::dto::worker::RegisterWorkerRequest;

use crate::repository::worker as worker_repository;

/// A worker missing heartbeats this long is stalled.
const STALL_THRESHOLD: Duration = Duration::from_secs(120);

const STALL_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum WorkerError {
    NotFound(String),
    InvalidRequest(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for WorkerError {
    fn from(err: sqlx::Error) -> Self {
        WorkerError::DatabaseError(err)
    }
}

pub async fn register(pool: &PgPool, req: RegisterWorkerRequest) -> Result<(), WorkerError> {
    if req.name.is_empty() {
        return Err(WorkerError::InvalidRequest("worker name is required".into()));
    }
    if req.addr.is_empty() {
        return Err(WorkerError::InvalidRequest("worker addr is required".into()));
    }

    worker_repository::register(pool, &req).await?;

    info!(worker = %req.name, addr = %req.addr, platform = %req.platform, "worker registered");
    Ok(())
}

pub async fn heartbeat(
    pool: &PgPool,
    name: &str,
    active_containers: i32,
) -> Result<(), WorkerError> {
    if !worker_repository::heartbeat(pool, name, active_containers).await? {
        return Err(WorkerError::NotFound(name.to_string()));
    }
    Ok(())
}

pub async fn list(pool: &PgPool) -> Result<Vec<Worker>, WorkerError> {
    Ok(worker_repository::list_all(pool).await?)
}

/// Drain a worker: no new containers land on it while existing ones finish.
pub async fn land(pool: &PgPool, name: &str) -> Result<(), WorkerError> {
    if !worker_repository::set_state(pool, name, WorkerState::Landing).await? {
        return Err(WorkerError::NotFound(name.to_string()));
    }
    info!(worker = %name, "worker landing");
    Ok(())
}

/// Permanently remove a worker from rotation.
pub async fn retire(pool: &PgPool, name: &str) -> Result<(), WorkerError> {
    if !worker_repository::set_state(pool, name, WorkerState::Retiring).await? {
        return Err(WorkerError::NotFound(name.to_string()));
    }
    info!(worker = %name, "worker retiring");
    Ok(())
}

/// Periodic member flipping unresponsive workers to `stalled`.
pub async fn run_stall_sweep(pool: PgPool, token: CancellationToken) {
    let mut ticker = tokio::time::interval(STALL_SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match worker_repository::stall_unresponsive(&pool, STALL_THRESHOLD).await {
            Ok(0) => {}
            Ok(stalled) => warn!(stalled, "marked unresponsive workers as stalled"),
            Err(e) => warn!("stall sweep failed: {}", e),
        }
    }
}
