//! Control-plane configuration
//!
//! Typed flags for the `flightdeck-atc` binary. Intervals accept `30s`, `5m`,
//! `2h` style values. The Postgres DSN falls back to `DATABASE_URL` so local
//! development needs no flags at all.

use clap::Parser;
use std::time::Duration;

use flightdeck_core::duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "flightdeck-atc", about = "Flightdeck CI control plane", version)]
pub struct AtcConfig {
    /// Address to listen on for HTTP traffic.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// URL used to reach this node from the outside world.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub external_url: String,

    /// URL used to reach this node from workers and other cluster nodes,
    /// e.g. for artifact streaming between workers.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub peer_url: String,

    /// PostgreSQL connection string.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://127.0.0.1:5432/flightdeck?sslmode=disable"
    )]
    pub postgres_data_source: String,

    /// Interval on which to check for new versions of resources.
    #[arg(long, value_parser = parse_interval, default_value = "1m")]
    pub resource_checking_interval: Duration,

    /// How long to keep a resource cache after a newer version appears.
    #[arg(long, value_parser = parse_interval, default_value = "5m")]
    pub old_resource_grace_period: Duration,

    /// Interval on which to clean up old resource caches.
    #[arg(long, value_parser = parse_interval, default_value = "30s")]
    pub resource_cache_cleanup_interval: Duration,

    /// How long to keep a succeeded step's containers before expiry.
    #[arg(long, value_parser = parse_interval, default_value = "5m")]
    pub container_retention_success_duration: Duration,

    /// How long to keep a failed step's containers before expiry.
    #[arg(long, value_parser = parse_interval, default_value = "1h")]
    pub container_retention_failure_duration: Duration,

    /// How many completed builds to keep logs for, per job. Jobs can lower
    /// this individually in their config.
    #[arg(long, default_value_t = 500)]
    pub build_log_retention: u32,

    /// Syslog drain to forward build logs to, as host:port.
    #[arg(long)]
    pub syslog_drain_url: Option<String>,

    /// Don't do any automatic scheduling or checking.
    #[arg(short = 'n', long, default_value_t = false)]
    pub noop: bool,
}

impl AtcConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.external_url.starts_with("http://") && !self.external_url.starts_with("https://") {
            anyhow::bail!("external-url must start with http:// or https://");
        }

        if !self.peer_url.starts_with("http://") && !self.peer_url.starts_with("https://") {
            anyhow::bail!("peer-url must start with http:// or https://");
        }

        if self.resource_checking_interval.is_zero() {
            anyhow::bail!("resource-checking-interval must be greater than 0");
        }

        if self.resource_cache_cleanup_interval.is_zero() {
            anyhow::bail!("resource-cache-cleanup-interval must be greater than 0");
        }

        if self.build_log_retention == 0 {
            anyhow::bail!("build-log-retention must be greater than 0");
        }

        Ok(())
    }
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    duration::parse(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> AtcConfig {
        AtcConfig::parse_from(["flightdeck-atc"])
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.resource_checking_interval, Duration::from_secs(60));
        assert_eq!(
            config.resource_cache_cleanup_interval,
            Duration::from_secs(30)
        );
        assert_eq!(config.build_log_retention, 500);
        assert!(!config.noop);
    }

    #[test]
    fn test_interval_flags_parse_units() {
        let config = AtcConfig::parse_from([
            "flightdeck-atc",
            "--resource-checking-interval",
            "10s",
            "--old-resource-grace-period",
            "2m",
        ]);
        assert_eq!(config.resource_checking_interval, Duration::from_secs(10));
        assert_eq!(config.old_resource_grace_period, Duration::from_secs(120));
    }

    #[test]
    fn test_validation_rejects_bad_urls() {
        let mut config = default_config();
        config.external_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
    }
}
