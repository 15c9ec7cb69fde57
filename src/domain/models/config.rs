//! Main configuration structure for the control plane. Each section maps
//! onto one service's config struct; `infrastructure::config::loader`
//! converts the loaded, validated [`Config`] into each service's own
//! `*Config` (which use `Duration` rather than raw seconds, so the
//! translation is a one-way `From` at wiring time rather than shared types).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            dispatcher: DispatcherConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            restart: RestartConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutsConfig::default(),
            supervisor: SupervisorConfig::default(),
            spawn: SpawnConfig::default(),
        }
    }
}

/// Store location and pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".swarmctl/swarmctl.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path(), max_connections: default_max_connections() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for file output; `None` means stdout only.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_true")]
    pub stdout: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
            stdout: default_true(),
            rotation: default_rotation(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherMode {
    InRegistry,
    Sandbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatcherConfig {
    #[serde(default)]
    pub mode: DispatcherMode,
    #[serde(default = "default_dispatcher_poll_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub phase: Option<String>,
}

const fn default_dispatcher_poll_seconds() -> u64 {
    10
}

impl Default for DispatcherMode {
    fn default() -> Self {
        Self::InRegistry
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { mode: DispatcherMode::default(), poll_interval_seconds: default_dispatcher_poll_seconds(), phase: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HeartbeatConfig {
    #[serde(default = "default_ttl_idle")]
    pub ttl_idle_seconds: i64,
    #[serde(default = "default_ttl_running")]
    pub ttl_running_seconds: i64,
    #[serde(default = "default_ttl_guardian")]
    pub ttl_guardian_seconds: i64,
}

const fn default_ttl_idle() -> i64 {
    30
}
const fn default_ttl_running() -> i64 {
    15
}
const fn default_ttl_guardian() -> i64 {
    60
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ttl_idle_seconds: default_ttl_idle(),
            ttl_running_seconds: default_ttl_running(),
            ttl_guardian_seconds: default_ttl_guardian(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestartConfig {
    #[serde(default = "default_restart_cooldown")]
    pub cooldown_seconds: i64,
    #[serde(default = "default_restart_max_attempts")]
    pub max_attempts: u32,
}

const fn default_restart_cooldown() -> i64 {
    60
}
const fn default_restart_max_attempts() -> u32 {
    3
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self { cooldown_seconds: default_restart_cooldown(), max_attempts: default_restart_max_attempts() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    #[serde(default = "default_max_retries_default")]
    pub max_retries_default: u32,
    #[serde(default = "default_retryable_substrings")]
    pub retryable_substrings: Vec<String>,
}

const fn default_base_delay() -> f64 {
    1.0
}
const fn default_max_delay() -> f64 {
    60.0
}
const fn default_max_retries_default() -> u32 {
    3
}
fn default_retryable_substrings() -> Vec<String> {
    vec![
        "timeout".to_string(),
        "connection".to_string(),
        "rate limit".to_string(),
        "unavailable".to_string(),
        "temporary".to_string(),
    ]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
            max_retries_default: default_max_retries_default(),
            retryable_substrings: default_retryable_substrings(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutsConfig {
    #[serde(default = "default_task_timeout")]
    pub default_task_seconds: i64,
}

const fn default_task_timeout() -> i64 {
    600
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self { default_task_seconds: default_task_timeout() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    #[serde(default)]
    pub diagnostic: DiagnosticConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub blocking: BlockingConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            diagnostic: DiagnosticConfig::default(),
            anomaly: AnomalyConfig::default(),
            blocking: BlockingConfig::default(),
            approval: ApprovalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosticConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_diagnostic_cooldown")]
    pub cooldown_seconds: i64,
    #[serde(default = "default_min_stuck_seconds")]
    pub min_stuck_seconds: i64,
}

const fn default_diagnostic_cooldown() -> i64 {
    300
}
const fn default_min_stuck_seconds() -> i64 {
    1800
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cooldown_seconds: default_diagnostic_cooldown(),
            min_stuck_seconds: default_min_stuck_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnomalyConfig {
    #[serde(default = "default_anomaly_threshold")]
    pub threshold: f64,
    #[serde(default = "default_consecutive_readings")]
    pub consecutive_readings: u32,
}

const fn default_anomaly_threshold() -> f64 {
    0.8
}
const fn default_consecutive_readings() -> u32 {
    3
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self { threshold: default_anomaly_threshold(), consecutive_readings: default_consecutive_readings() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BlockingConfig {
    #[serde(default = "default_blocking_threshold")]
    pub threshold_seconds: i64,
}

const fn default_blocking_threshold() -> i64 {
    1800
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self { threshold_seconds: default_blocking_threshold() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ApprovalConfig {
    #[serde(default = "default_approval_poll_seconds")]
    pub poll_seconds: u64,
}

const fn default_approval_poll_seconds() -> u64 {
    10
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { poll_seconds: default_approval_poll_seconds() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SpawnConfig {
    #[serde(default = "default_max_concurrent_spawns")]
    pub max_concurrent: u32,
}

const fn default_max_concurrent_spawns() -> u32 {
    10
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self { max_concurrent: default_max_concurrent_spawns() }
    }
}
