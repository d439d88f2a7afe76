//! Radar
//!
//! Periodic resource checking. Each resource of a pipeline gets its own
//! interval loop; each tick races for the `resource-checking:{id}` lease with
//! TTL equal to the interval, so across the cluster exactly one node performs
//! any given check. Checks run in the resource's long-lived check container
//! (identity `(pipeline_id, resource_id)`), asking the resource image for
//! versions after the latest one already known. Manual scans reuse the same
//! routine under a unique nonce lease so they never wait out the interval.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flightdeck_core::domain::container::ContainerIdentifier;
use flightdeck_core::domain::pipeline::Pipeline;
use flightdeck_core::domain::resource::Resource;
use flightdeck_core::domain::version::Version;
use flightdeck_core::duration;
use flightdeck_worker::CheckRequest;

use crate::app::App;
use crate::repository::{
    lease as lease_repository, resource as resource_repository, version as version_repository,
};
use crate::supervisor::Supervisor;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("placement error: {0}")]
    Pool(#[from] crate::worker_pool::PoolError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another node owns this check interval.
    NotLeased,
    /// The resource is paused; nothing to do.
    Paused,
    /// The check script failed; its output is recorded on the resource.
    CheckFailed(String),
    /// The check ran; this many versions were new.
    Checked(usize),
}

/// The per-pipeline radar member: one interval loop per configured resource.
pub async fn run(app: Arc<App>, pipeline: Pipeline, token: CancellationToken) {
    let mut group = Supervisor::new();

    for resource_config in &pipeline.config.resources {
        let interval = resource_config
            .check_every
            .as_deref()
            .and_then(|raw| match duration::parse(raw) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(
                        resource = %resource_config.name,
                        "invalid check_every {:?}: {}; using default", raw, e
                    );
                    None
                }
            })
            .unwrap_or(app.settings.resource_checking_interval);

        let app = Arc::clone(&app);
        let pipeline_id = pipeline.id;
        let resource_name = resource_config.name.clone();

        group.spawn(format!("check:{}", resource_name), move |member_token| {
            scan_loop(app, pipeline_id, resource_name, interval, member_token)
        });
    }

    token.cancelled().await;
    group.shutdown().await;
}

async fn scan_loop(
    app: Arc<App>,
    pipeline_id: Uuid,
    resource_name: String,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let resource =
            match resource_repository::find_by_name(&app.pool, pipeline_id, &resource_name).await {
                Ok(Some(resource)) => resource,
                Ok(None) => {
                    debug!(resource = %resource_name, "resource row gone; stopping checks");
                    return;
                }
                Err(e) => {
                    warn!(resource = %resource_name, "failed to load resource: {}", e);
                    continue;
                }
            };

        let lease_name = lease_repository::resource_checking(resource.id);

        match scan(&app, &resource, &lease_name, interval, None).await {
            Ok(ScanOutcome::Checked(new_versions)) if new_versions > 0 => {
                info!(resource = %resource_name, new_versions, "found new versions");
            }
            Ok(ScanOutcome::CheckFailed(_)) => {
                warn!(resource = %resource_name, "resource check failed");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(resource = %resource_name, "scan failed: {}", e);
            }
        }
    }
}

/// One scan: lease, container, check, persist. Both the interval loop and
/// manual scans funnel through here; they differ only in the lease name and
/// the optional `from` override.
pub async fn scan(
    app: &App,
    resource: &Resource,
    lease_name: &str,
    lease_ttl: Duration,
    from_override: Option<Version>,
) -> Result<ScanOutcome, ScanError> {
    if resource.paused {
        return Ok(ScanOutcome::Paused);
    }

    if !lease_repository::acquire(&app.pool, lease_name, lease_ttl).await? {
        return Ok(ScanOutcome::NotLeased);
    }

    let tracked = app
        .tracker
        .init(
            ContainerIdentifier::Check {
                pipeline_id: resource.pipeline_id,
                resource_id: resource.id,
            },
            &resource.resource_type,
            &[],
            vec![],
        )
        .await?;

    let from = match from_override {
        Some(version) => Some(version),
        None => version_repository::latest(&app.pool, resource.id)
            .await?
            .map(|v| v.version),
    };

    let response = match app
        .workers
        .host()
        .check(
            &tracked.worker.addr,
            &tracked.container.handle,
            CheckRequest {
                source: resource.source.clone(),
                from,
            },
        )
        .await
    {
        Ok(response) => response,
        Err(e) => {
            // Transient transport faults are recorded like script failures;
            // the next tick retries either way.
            resource_repository::set_check_result(&app.pool, resource.id, Some(&e.to_string()))
                .await?;
            return Ok(ScanOutcome::CheckFailed(e.to_string()));
        }
    };

    if response.exit_status != 0 {
        let message = if response.output.is_empty() {
            format!("check exited {}", response.exit_status)
        } else {
            response.output.join("\n")
        };

        resource_repository::set_check_result(&app.pool, resource.id, Some(&message)).await?;
        return Ok(ScanOutcome::CheckFailed(message));
    }

    let inserted =
        version_repository::save_versions(&app.pool, resource.id, &response.versions).await?;

    resource_repository::set_check_result(&app.pool, resource.id, None).await?;

    Ok(ScanOutcome::Checked(inserted))
}
