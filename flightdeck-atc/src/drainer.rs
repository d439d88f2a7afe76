//! Syslog drainer
//!
//! Forwards the `log` events of completed, not-yet-drained builds to a
//! configured syslog endpoint, then flags each build drained so it is
//! forwarded exactly once. Transport sits behind a trait so tests record
//! lines instead of opening sockets.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use flightdeck_core::domain::build::Build;
use flightdeck_core::domain::event::EventType;

use crate::repository::{build as build_repository, event as event_repository};

pub const DRAIN_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait]
pub trait LogDrain: Send + Sync {
    async fn send_lines(&self, lines: Vec<String>) -> anyhow::Result<()>;
}

/// Line-oriented TCP transport; reconnects per batch.
pub struct TcpDrain {
    addr: String,
}

impl TcpDrain {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl LogDrain for TcpDrain {
    async fn send_lines(&self, lines: Vec<String>) -> anyhow::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let mut stream = TcpStream::connect(&self.addr).await?;

        for line in lines {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;
        }

        stream.flush().await?;
        Ok(())
    }
}

pub struct Drainer {
    pool: PgPool,
    drain: Arc<dyn LogDrain>,
    hostname: String,
}

impl Drainer {
    pub fn new(pool: PgPool, drain: Arc<dyn LogDrain>, hostname: String) -> Self {
        Self {
            pool,
            drain,
            hostname,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.drain_once().await {
                error!("drain pass failed: {:#}", e);
            }
        }
    }

    async fn drain_once(&self) -> anyhow::Result<()> {
        let builds = build_repository::all_drainable(&self.pool).await?;

        for build in builds {
            let lines = self.collect_lines(&build).await?;

            debug!(build = %build.id, lines = lines.len(), "draining build logs");

            self.drain.send_lines(lines).await?;
            build_repository::set_drained(&self.pool, build.id).await?;
        }

        Ok(())
    }

    async fn collect_lines(&self, build: &Build) -> Result<Vec<String>, sqlx::Error> {
        let events = event_repository::events_from(&self.pool, build.id, 0).await?;

        Ok(events
            .into_iter()
            .filter(|event| event.event_type == EventType::Log)
            .filter_map(|event| {
                event
                    .payload
                    .get("payload")
                    .and_then(|p| p.as_str())
                    .map(|line| format_line(&self.hostname, &build.name, line))
            })
            .collect())
    }
}

fn format_line(hostname: &str, build_name: &str, line: &str) -> String {
    format!("{} build#{} {}", hostname, build_name, line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_tags_the_build() {
        assert_eq!(
            format_line("atc-1", "42", "compiling"),
            "atc-1 build#42 compiling"
        );
    }
}
