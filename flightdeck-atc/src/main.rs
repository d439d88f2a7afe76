//! Flightdeck control plane
//!
//! Persists pipelines, watches resources for new versions, schedules builds,
//! executes their step trees against remote container hosts, and reaps
//! expired state. Several nodes can run against one database; named TTL'd
//! leases make every periodic singleton and every in-flight build
//! single-owner across the cluster.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod drainer;
pub mod engine;
pub mod radar;
pub mod reaper;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod supervisor;
pub mod syncer;
pub mod tracker;
pub mod worker_pool;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flightdeck_worker::WorkerClient;

use crate::app::App;
use crate::config::AtcConfig;
use crate::drainer::{Drainer, TcpDrain};
use crate::engine::Engine;
use crate::reaper::build_reaper::BuildReaper;
use crate::reaper::lost_and_found::BaggageCollector;
use crate::supervisor::Supervisor;
use crate::syncer::PipelineSyncer;
use crate::tracker::BuildTracker;
use crate::worker_pool::{ResourceTracker, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flightdeck_atc=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = AtcConfig::parse();
    settings.validate().context("invalid configuration")?;

    info!("Starting Flightdeck control plane");

    let pool = db::create_pool(&settings.postgres_data_source)
        .await
        .context("failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let team_id = db::create_default_team(&pool)
        .await
        .context("failed to ensure default team")?;

    // Component wiring: worker client -> pool -> tracker -> engine.
    let host = Arc::new(WorkerClient::new());

    let workers = Arc::new(WorkerPool::new(
        pool.clone(),
        host,
        settings.container_retention_failure_duration.as_secs() as i64,
    ));

    let resource_tracker = Arc::new(ResourceTracker::new(Arc::clone(&workers)));

    let engine = Arc::new(Engine::new(
        pool.clone(),
        Arc::clone(&workers),
        Arc::clone(&resource_tracker),
        settings.external_url.clone(),
    ));

    let app = Arc::new(App {
        pool: pool.clone(),
        team_id,
        workers,
        tracker: resource_tracker,
        engine,
        settings: settings.clone(),
    });

    let mut group = Supervisor::new();

    if settings.noop {
        info!("noop mode: scheduling and checking disabled");
    } else {
        let syncer_app = Arc::clone(&app);
        group.spawn("pipelines", move |token| {
            PipelineSyncer::new(syncer_app).run(token)
        });

        let tracker_app = Arc::clone(&app);
        group.spawn("builds", move |token| {
            BuildTracker::new(tracker_app).run(token)
        });

        let baggage_pool = pool.clone();
        let baggage_interval = settings.resource_cache_cleanup_interval;
        let baggage = Arc::new(BaggageCollector::new(Arc::clone(&app)));
        group.spawn("lostandfound", move |token| {
            reaper::lease_runner::run(
                baggage_pool,
                "baggage-collector".to_string(),
                baggage_interval,
                baggage,
                token,
            )
        });

        let reaper_pool = pool.clone();
        let build_reaper = Arc::new(BuildReaper::new(Arc::clone(&app)));
        group.spawn("buildreaper", move |token| {
            reaper::lease_runner::run(
                reaper_pool,
                "build-reaper".to_string(),
                std::time::Duration::from_secs(30),
                build_reaper,
                token,
            )
        });

        let sweep_pool = pool.clone();
        group.spawn("workersweeper", move |token| {
            service::worker::run_stall_sweep(sweep_pool, token)
        });
    }

    if let Some(drain_url) = settings.syslog_drain_url.clone() {
        let hostname = settings
            .external_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();

        let drainer = Drainer::new(pool.clone(), Arc::new(TcpDrain::new(drain_url)), hostname);
        group.spawn("drainer", move |token| drainer.run(token));
    }

    // HTTP API
    let router = api::create_router(Arc::clone(&app));
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    info!("Listening on {}", settings.bind_addr);

    group.spawn("web", move |token| async move {
        let shutdown = async move { token.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!("HTTP server exited with error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutting down");
    group.shutdown().await;

    Ok(())
}
