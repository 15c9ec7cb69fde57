//! Layered configuration loading: programmatic defaults, then project
//! config, then project-local overrides, then environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::{self, Config};
use crate::services::dispatcher::{DispatcherConfig as RuntimeDispatcherConfig, DispatcherMode as RuntimeDispatcherMode};
use crate::services::heartbeat_service::HeartbeatConfig as RuntimeHeartbeatConfig;
use crate::services::restart_orchestrator::RestartConfig as RuntimeRestartConfig;
use crate::services::supervisor::anomaly_scorer::AnomalyScorerConfig;
use crate::services::supervisor::approval_timeout::ApprovalTimeoutConfig;
use crate::services::supervisor::blocking_detector::BlockingDetectorConfig;
use crate::services::supervisor::stuck_workflow::StuckWorkflowConfig;
use crate::services::task_queue_service::{RetryConfig as RuntimeRetryConfig, TimeoutsConfig as RuntimeTimeoutsConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("invalid heartbeat ttl: idle={idle}, running={running}, guardian={guardian}. All must be positive")]
    InvalidHeartbeatTtl { idle: i64, running: i64, guardian: i64 },

    #[error("invalid retry backoff: base_delay_seconds ({0}) must be less than max_delay_seconds ({1})")]
    InvalidBackoff(f64, f64),

    #[error("retry.retryable_substrings must not be empty")]
    EmptyRetryableSubstrings,

    #[error("invalid restart config: cooldown_seconds ({0}) and max_attempts ({1}) must be positive")]
    InvalidRestartConfig(i64, u32),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest): defaults, `.swarmctl/config.yaml`,
    /// `.swarmctl/local.yaml`, `SWARMCTL_*` environment variables.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".swarmctl/config.yaml"))
            .merge(Yaml::file(".swarmctl/local.yaml"))
            .merge(Env::prefixed("SWARMCTL_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let hb = &config.heartbeat;
        if hb.ttl_idle_seconds <= 0 || hb.ttl_running_seconds <= 0 || hb.ttl_guardian_seconds <= 0 {
            return Err(ConfigError::InvalidHeartbeatTtl {
                idle: hb.ttl_idle_seconds,
                running: hb.ttl_running_seconds,
                guardian: hb.ttl_guardian_seconds,
            });
        }

        if config.retry.base_delay_seconds >= config.retry.max_delay_seconds {
            return Err(ConfigError::InvalidBackoff(config.retry.base_delay_seconds, config.retry.max_delay_seconds));
        }
        if config.retry.retryable_substrings.is_empty() {
            return Err(ConfigError::EmptyRetryableSubstrings);
        }

        if config.restart.cooldown_seconds <= 0 || config.restart.max_attempts == 0 {
            return Err(ConfigError::InvalidRestartConfig(config.restart.cooldown_seconds, config.restart.max_attempts));
        }

        Ok(())
    }
}

impl From<&config::DispatcherConfig> for RuntimeDispatcherConfig {
    fn from(c: &config::DispatcherConfig) -> Self {
        Self {
            mode: match c.mode {
                config::DispatcherMode::InRegistry => RuntimeDispatcherMode::InRegistry,
                config::DispatcherMode::Sandbox => RuntimeDispatcherMode::Sandbox,
            },
            poll_interval: Duration::from_secs(c.poll_interval_seconds),
            phase: c.phase.clone(),
            sandbox_agent_kind: crate::domain::models::AgentKind::Worker,
            max_concurrent_spawns: 10,
        }
    }
}

impl From<&config::HeartbeatConfig> for RuntimeHeartbeatConfig {
    fn from(c: &config::HeartbeatConfig) -> Self {
        Self {
            ttl_idle_seconds: c.ttl_idle_seconds,
            ttl_running_seconds: c.ttl_running_seconds,
            ttl_guardian_seconds: c.ttl_guardian_seconds,
        }
    }
}

impl From<&config::RestartConfig> for RuntimeRestartConfig {
    fn from(c: &config::RestartConfig) -> Self {
        Self { cooldown_seconds: c.cooldown_seconds, max_restarts: c.max_attempts }
    }
}

impl From<&config::RetryConfig> for RuntimeRetryConfig {
    fn from(c: &config::RetryConfig) -> Self {
        Self {
            base_delay_seconds: c.base_delay_seconds,
            max_delay_seconds: c.max_delay_seconds,
            max_retries_default: c.max_retries_default,
            retryable_substrings: c.retryable_substrings.clone(),
        }
    }
}

impl From<&config::TimeoutsConfig> for RuntimeTimeoutsConfig {
    fn from(c: &config::TimeoutsConfig) -> Self {
        Self::default_or(c.default_task_seconds)
    }
}

impl From<&config::SupervisorConfig> for StuckWorkflowConfig {
    fn from(c: &config::SupervisorConfig) -> Self {
        Self {
            enabled: c.diagnostic.enabled,
            poll_interval: Duration::from_secs(60),
            min_stuck_seconds: c.diagnostic.min_stuck_seconds,
            cooldown_seconds: c.diagnostic.cooldown_seconds,
        }
    }
}

impl From<&config::SupervisorConfig> for AnomalyScorerConfig {
    fn from(c: &config::SupervisorConfig) -> Self {
        Self {
            enabled: c.diagnostic.enabled,
            poll_interval: Duration::from_secs(60),
            score_threshold: c.anomaly.threshold,
            consecutive_readings: c.anomaly.consecutive_readings,
            cooldown_seconds: c.diagnostic.cooldown_seconds,
        }
    }
}

impl From<&config::SupervisorConfig> for ApprovalTimeoutConfig {
    fn from(c: &config::SupervisorConfig) -> Self {
        Self { enabled: true, poll_interval: Duration::from_secs(c.approval.poll_seconds) }
    }
}

impl From<&config::SupervisorConfig> for BlockingDetectorConfig {
    fn from(c: &config::SupervisorConfig) -> Self {
        Self { enabled: true, poll_interval: Duration::from_secs(300), threshold_seconds: c.blocking.threshold_seconds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.database.path, ".swarmctl/swarmctl.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn yaml_parsing_overrides_nested_fields() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: pretty
heartbeat:
  ttl_idle_seconds: 45
";
        let config: Config = serde_yaml::from_str(yaml).expect("yaml should parse");
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.heartbeat.ttl_idle_seconds, 45);
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn rejects_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyDatabasePath)));
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn rejects_inverted_retry_backoff() {
        let mut config = Config::default();
        config.retry.base_delay_seconds = 100.0;
        config.retry.max_delay_seconds = 10.0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidBackoff(_, _))));
    }

    #[test]
    fn rejects_zero_heartbeat_ttl() {
        let mut config = Config::default();
        config.heartbeat.ttl_running_seconds = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidHeartbeatTtl { .. })));
    }

    #[test]
    fn env_vars_override_file_values() {
        temp_env::with_vars(
            [
                ("SWARMCTL_LOGGING__LEVEL", Some("warn")),
                ("SWARMCTL_HEARTBEAT__TTL_IDLE_SECONDS", Some("45")),
            ],
            || {
                let config: Config = Figment::new()
                    .merge(Serialized::defaults(Config::default()))
                    .merge(Env::prefixed("SWARMCTL_").split("__"))
                    .extract()
                    .unwrap();
                assert_eq!(config.logging.level, "warn");
                assert_eq!(config.heartbeat.ttl_idle_seconds, 45);
            },
        );
    }

    #[test]
    fn hierarchical_merging_lets_overrides_win() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "database:\n  max_connections: 5\nlogging:\n  level: info\n  format: json").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "database:\n  max_connections: 15\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.database.max_connections, 15, "override should win");
        assert_eq!(config.logging.level, "debug", "override should win for nested fields");
        assert_eq!(config.logging.format, "json", "base value should persist when not overridden");
    }
}
