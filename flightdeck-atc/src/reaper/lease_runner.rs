//! Lease-gated periodic runner
//!
//! Runs a collector on an interval, but only on the node that wins the named
//! lease that tick. The lease TTL equals the interval, so a crashed winner's
//! slot frees itself by the next tick.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::repository::lease as lease_repository;

#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self) -> anyhow::Result<()>;
}

pub async fn run(
    pool: PgPool,
    lease_name: String,
    interval: Duration,
    collector: Arc<dyn Collector>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match lease_repository::acquire(&pool, &lease_name, interval).await {
            Ok(true) => {
                debug!(lease = %lease_name, "lease acquired; collecting");
                if let Err(e) = collector.collect().await {
                    error!(lease = %lease_name, "collection failed: {:#}", e);
                }
            }
            Ok(false) => {
                debug!(lease = %lease_name, "lease held elsewhere; skipping");
            }
            Err(e) => {
                error!(lease = %lease_name, "failed to acquire lease: {}", e);
            }
        }
    }
}
