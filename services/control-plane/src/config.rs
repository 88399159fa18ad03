use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;

use crate::db::DbConfig;
use crate::lifecycle::RolloutMonitorConfig;
use crate::provisioner::HttpProvisionerConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub provisioner: HttpProvisionerConfig,
    pub rollout: RolloutMonitorConfig,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("CAPHUB_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("CAPHUB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("CAPHUB_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let database = DbConfig::from_env();

        let mut provisioner = HttpProvisionerConfig::default();
        if let Ok(url) = std::env::var("CAPHUB_PROVISIONER_URL") {
            provisioner.base_url = url;
        }
        if let Ok(app) = std::env::var("CAPHUB_PROVISIONER_APP") {
            provisioner.app_name = app;
        }
        if let Ok(token) = std::env::var("CAPHUB_PROVISIONER_TOKEN") {
            provisioner.token = Some(token);
        }
        if let Some(timeout) = env_duration_secs("CAPHUB_PROVISIONER_TIMEOUT_SECS") {
            provisioner.request_timeout = timeout;
        }

        let mut rollout = RolloutMonitorConfig::default();
        if let Some(interval) = env_duration_secs("CAPHUB_ROLLOUT_POLL_INTERVAL_SECS") {
            rollout.poll_interval = interval;
        }
        if let Some(timeout) = env_duration_secs("CAPHUB_ROLLOUT_POLL_TIMEOUT_SECS") {
            rollout.poll_timeout = timeout;
        }
        if let Some(timeout) = env_duration_secs("CAPHUB_TEARDOWN_TIMEOUT_SECS") {
            rollout.teardown_timeout = timeout;
        }

        let sweep_interval =
            env_duration_secs("CAPHUB_SWEEP_INTERVAL_SECS").unwrap_or(Duration::from_secs(30));

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            database,
            provisioner,
            rollout,
            sweep_interval,
        })
    }
}

fn env_duration_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.log_level, "info");
        assert!(!config.dev_mode);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.rollout.poll_interval, Duration::from_secs(10));
    }
}
