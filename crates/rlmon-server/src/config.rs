use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request, if set.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            token: None,
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Wall-clock budget for a whole tick; stage timeouts never exceed
    /// what is left of it.
    #[serde(default = "default_tick_timeout_secs")]
    pub tick_timeout_secs: u64,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Per-endpoint calls in flight at once while fetching, enriching
    /// and alerting.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            tick_timeout_secs: default_tick_timeout_secs(),
            stage_timeout_secs: default_stage_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            max_interval_secs: default_max_interval_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
    /// UTC hour the daily cleanup window opens.
    #[serde(default = "default_cleanup_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default = "default_cleanup_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            hour: default_cleanup_hour(),
            minute: 0,
            window_minutes: default_cleanup_window_minutes(),
            retention_months: default_retention_months(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Events are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_publisher_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_publisher_timeout_secs(),
        }
    }
}

fn default_http_port() -> u16 {
    9090
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_upstream_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    10
}

fn default_tick_secs() -> u64 {
    300
}

fn default_tick_timeout_secs() -> u64 {
    240
}

fn default_stage_timeout_secs() -> u64 {
    60
}

fn default_concurrency() -> usize {
    8
}

fn default_initial_interval_ms() -> u64 {
    2000
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_max_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_cleanup_hour() -> u32 {
    3
}

fn default_cleanup_window_minutes() -> u32 {
    5
}

fn default_retention_months() -> u32 {
    13
}

fn default_publisher_timeout_secs() -> u64 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            log_format: default_log_format(),
            upstream: UpstreamConfig::default(),
            schedule: ScheduleConfig::default(),
            retry: RetryConfig::default(),
            cleanup: CleanupConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{}': {}", path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schedule.tick_secs == 0 {
            anyhow::bail!("schedule.tick_secs must be greater than zero");
        }
        if self.schedule.tick_timeout_secs == 0 || self.schedule.stage_timeout_secs == 0 {
            anyhow::bail!("schedule timeouts must be greater than zero");
        }
        if self.schedule.concurrency == 0 {
            anyhow::bail!("schedule.concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if !(self.retry.backoff_coefficient >= 1.0) {
            anyhow::bail!("retry.backoff_coefficient must be >= 1.0");
        }
        if self.cleanup.hour > 23 || self.cleanup.minute > 59 {
            anyhow::bail!("cleanup.hour/minute out of range");
        }
        if self.cleanup.window_minutes == 0 {
            anyhow::bail!("cleanup.window_minutes must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            anyhow::bail!("log_format must be 'text' or 'json'");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("rlmon.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = MonitorConfig::from_toml("").unwrap();
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.schedule.tick_secs, 300);
        assert_eq!(config.schedule.concurrency, 8);
        assert_eq!(config.retry.initial_interval_ms, 2000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.cleanup.hour, 3);
        assert_eq!(config.cleanup.window_minutes, 5);
        assert_eq!(config.cleanup.retention_months, 13);
        assert!(config.publisher.webhook_url.is_none());
        assert_eq!(config.publisher.timeout_secs, 5);
        assert_eq!(config.db_path(), PathBuf::from("data").join("rlmon.db"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
            http_port = 9100
            log_format = "json"

            [upstream]
            base_url = "https://directory.internal/api"
            token = "secret"

            [schedule]
            tick_secs = 60
            concurrency = 2

            [cleanup]
            hour = 4
            minute = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 9100);
        assert_eq!(config.upstream.token.as_deref(), Some("secret"));
        assert_eq!(config.upstream.timeout_secs, 10);
        assert_eq!(config.schedule.tick_secs, 60);
        assert_eq!(config.schedule.stage_timeout_secs, 60);
        assert_eq!(config.schedule.concurrency, 2);
        assert_eq!(config.cleanup.minute, 30);
        assert!(config.cleanup.enabled);
    }

    #[test]
    fn shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/rlmon.toml");
        let config = MonitorConfig::load(path).unwrap();
        assert_eq!(config.schedule.tick_secs, 300);
        assert!(config.upstream.token.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(MonitorConfig::from_toml("[retry]\nmax_attempts = 0").is_err());
        assert!(MonitorConfig::from_toml("[retry]\nbackoff_coefficient = 0.5").is_err());
        assert!(MonitorConfig::from_toml("[cleanup]\nhour = 24").is_err());
        assert!(MonitorConfig::from_toml("[schedule]\nconcurrency = 0").is_err());
        assert!(MonitorConfig::from_toml("log_format = \"xml\"").is_err());
    }
}
