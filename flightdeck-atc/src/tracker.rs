//! Build tracker
//!
//! The resume loop. Every tick, every `started` build is offered to this
//! node: whoever wins the build's tracking lease reconstructs the step tree
//! from persisted metadata and drives it; everyone else skips silently.
//! Leases expire, so a crashed node's builds become reclaimable within one
//! TTL. Metadata that no longer parses errors the build instead of wedging
//! it.

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use flightdeck_core::domain::build::{Build, BuildStatus};

use crate::app::App;
use crate::engine::EngineBuild;
use crate::engine::delegate::BuildDelegate;
use crate::repository::{build as build_repository, lease as lease_repository};

pub const TRACKING_INTERVAL: Duration = Duration::from_secs(10);

/// Lease TTL; renewed at half-life while the resume runs.
const TRACKING_LEASE_TTL: Duration = Duration::from_secs(30);

pub struct BuildTracker {
    app: Arc<App>,
}

impl BuildTracker {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(TRACKING_INTERVAL);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.track().await {
                error!("build tracking sweep failed: {}", e);
            }
        }
    }

    async fn track(&self) -> Result<(), sqlx::Error> {
        debug!("scanning started builds");

        let builds = build_repository::all_started(&self.app.pool).await?;

        for build in builds {
            spawn_resume(&self.app, build).await;
        }

        Ok(())
    }
}

/// Lease the build and, if won, resume it in a background task. Builds whose
/// lease is held elsewhere are skipped silently; builds whose metadata fails
/// to parse are marked errored.
pub async fn spawn_resume(app: &App, build: Build) {
    let build_id = build.id;
    let lease_name = lease_repository::build_tracking(build_id);

    let leased = match lease_repository::acquire(&app.pool, &lease_name, TRACKING_LEASE_TTL).await {
        Ok(leased) => leased,
        Err(e) => {
            error!(build = %build_id, "failed to acquire tracking lease: {}", e);
            return;
        }
    };

    if !leased {
        return;
    }

    let engine_build = match app.engine.lookup_build(build) {
        Ok(engine_build) => engine_build,
        Err(e) => {
            error!(build = %build_id, "failed to rehydrate build: {}", e);

            let delegate = BuildDelegate::new(app.pool.clone(), build_id);
            if let Err(persist) = delegate.error(None, &e.to_string()).await {
                warn!(build = %build_id, "failed to persist error event: {}", persist);
            }
            if let Err(finish) = delegate.finish_build(BuildStatus::Errored).await {
                error!(build = %build_id, "failed to mark build errored: {}", finish);
            }

            release_lease(&app.pool, &lease_name).await;
            return;
        }
    };

    track_engine_build(app.pool.clone(), engine_build, lease_name);
}

/// Lease an already-constructed engine build (the one-off path, where the
/// plan never went through metadata parsing) and resume it if won.
pub async fn spawn_created(app: &App, engine_build: EngineBuild) {
    let build_id = engine_build.build_id();
    let lease_name = lease_repository::build_tracking(build_id);

    match lease_repository::acquire(&app.pool, &lease_name, TRACKING_LEASE_TTL).await {
        Ok(true) => track_engine_build(app.pool.clone(), engine_build, lease_name),
        Ok(false) => {}
        Err(e) => error!(build = %build_id, "failed to acquire tracking lease: {}", e),
    }
}

fn track_engine_build(pool: PgPool, engine_build: EngineBuild, lease_name: String) {
    let build_id = engine_build.build_id();

    tokio::spawn(async move {
        let abort = CancellationToken::new();

        let watcher = tokio::spawn(watch_build(
            pool.clone(),
            build_id,
            lease_name.clone(),
            abort.clone(),
        ));

        engine_build.resume(abort).await;

        watcher.abort();
        release_lease(&pool, &lease_name).await;
    });

    info!(build = %build_id, "tracking build");
}

/// Sidecar for a running resume: renews the tracking lease and watches for
/// abort requests, both over the build's notification channel and by polling
/// the flag in case a notification was missed.
async fn watch_build(pool: PgPool, build_id: Uuid, lease_name: String, abort: CancellationToken) {
    let channel = build_repository::abort_channel(build_id);

    let mut listener = match PgListener::connect_with(&pool).await {
        Ok(mut listener) => match listener.listen(&channel).await {
            Ok(()) => Some(listener),
            Err(e) => {
                warn!(build = %build_id, "failed to listen for aborts: {}", e);
                None
            }
        },
        Err(e) => {
            warn!(build = %build_id, "failed to open abort listener: {}", e);
            None
        }
    };

    let mut ticker = tokio::time::interval(TRACKING_LEASE_TTL / 2);

    loop {
        let notified = async {
            match listener.as_mut() {
                Some(listener) => {
                    let _ = listener.recv().await;
                }
                // No listener: the poll below still catches the flag.
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = notified => {
                abort.cancel();
                return;
            }
            _ = ticker.tick() => {}
        }

        match lease_repository::renew(&pool, &lease_name, TRACKING_LEASE_TTL).await {
            Ok(true) => {}
            Ok(false) => {
                // Expired under us, likely a long stall. Take it back rather
                // than abandon a running step tree.
                warn!(build = %build_id, "tracking lease lapsed; re-acquiring");
                let _ = lease_repository::acquire(&pool, &lease_name, TRACKING_LEASE_TTL).await;
            }
            Err(e) => warn!(build = %build_id, "failed to renew tracking lease: {}", e),
        }

        match build_repository::abort_requested(&pool, build_id).await {
            Ok(true) => {
                abort.cancel();
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(build = %build_id, "failed to poll abort flag: {}", e),
        }
    }
}

async fn release_lease(pool: &PgPool, lease_name: &str) {
    if let Err(e) = lease_repository::release(pool, lease_name).await {
        warn!(lease = %lease_name, "failed to release lease: {}", e);
    }
}
