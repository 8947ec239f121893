use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub errorflow: ErrorFlowConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub mail: MailConfig,
    /// Dry-run batch loading: consider at most this many harvested entries
    /// per repository per cycle and write nothing.
    #[serde(default)]
    pub sample_mode: Option<usize>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("harvester.db")
}

/// Locations of the three storage areas.
///
/// All three are required; they are optional here only so that a missing
/// entry can be reported as a configuration error instead of a parse error.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub processing: Option<PathBuf>,
    #[serde(default)]
    pub done: Option<PathBuf>,
    #[serde(default)]
    pub rejected: Option<PathBuf>,
    /// Directory holding transform stylesheets.
    #[serde(default = "default_stylesheets")]
    pub stylesheets: PathBuf,
}

fn default_stylesheets() -> PathBuf {
    PathBuf::from("stylesheets")
}

/// Scheduler daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Control loop tick for both daemons (milliseconds).
    #[serde(default = "default_tick")]
    pub tick_interval_ms: u64,

    /// Maximum identifier harvests running at once.
    #[serde(default = "default_parallel_harvests")]
    pub max_parallel_harvests: usize,

    /// Maximum object downloads running at once.
    #[serde(default = "default_parallel_downloads")]
    pub max_parallel_downloads: usize,

    /// Minimum delay between two download queue refills (milliseconds).
    #[serde(default = "default_refill_delay")]
    pub download_queue_fill_delay_ms: u64,

    /// Maximum pending records fetched per refill.
    #[serde(default = "default_queue_page_size")]
    pub queue_page_size: usize,

    /// How long a FAILED record waits before it is claimed again (seconds).
    #[serde(default = "default_failed_retry_delay")]
    pub failed_retry_delay_secs: u64,

    /// Wall-clock budget for one identifier harvest (seconds).
    #[serde(default = "default_harvest_budget")]
    pub harvest_budget_secs: u64,

    /// Wall-clock budget for one object download (seconds).
    #[serde(default = "default_download_budget")]
    pub download_budget_secs: u64,

    /// Calendar scheduler interval (seconds).
    #[serde(default = "default_calendar_interval")]
    pub calendar_interval_secs: u64,
}

fn default_tick() -> u64 {
    200
}

fn default_parallel_harvests() -> usize {
    4
}

fn default_parallel_downloads() -> usize {
    8
}

fn default_refill_delay() -> u64 {
    1000
}

fn default_queue_page_size() -> usize {
    50
}

fn default_failed_retry_delay() -> u64 {
    300
}

fn default_harvest_budget() -> u64 {
    6 * 3600
}

fn default_download_budget() -> u64 {
    600
}

fn default_calendar_interval() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick(),
            max_parallel_harvests: default_parallel_harvests(),
            max_parallel_downloads: default_parallel_downloads(),
            download_queue_fill_delay_ms: default_refill_delay(),
            queue_page_size: default_queue_page_size(),
            failed_retry_delay_secs: default_failed_retry_delay(),
            harvest_budget_secs: default_harvest_budget(),
            download_budget_secs: default_download_budget(),
            calendar_interval_secs: default_calendar_interval(),
        }
    }
}

/// Consecutive-failure thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorFlowConfig {
    #[serde(default = "default_harvest_failures")]
    pub max_consecutive_harvest_failures: u32,
    #[serde(default = "default_download_failures")]
    pub max_consecutive_download_failures: u32,
}

fn default_harvest_failures() -> u32 {
    3
}

fn default_download_failures() -> u32 {
    10
}

impl Default for ErrorFlowConfig {
    fn default() -> Self {
        Self {
            max_consecutive_harvest_failures: default_harvest_failures(),
            max_consecutive_download_failures: default_download_failures(),
        }
    }
}

/// Fault-tolerant fetch client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Per-attempt request timeout (seconds).
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff, doubled per retry (milliseconds).
    #[serde(default = "default_backoff")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff() -> u64 {
    500
}

fn default_user_agent() -> String {
    format!("harvester/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_backoff(),
            user_agent: default_user_agent(),
        }
    }
}

/// Operator alert configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MailConfig {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Sanitized config for API responses (recipient addresses redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub errorflow: ErrorFlowConfig,
    pub fetch: FetchConfig,
    pub mail_recipients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_mode: Option<usize>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            scheduler: config.scheduler.clone(),
            errorflow: config.errorflow.clone(),
            fetch: config.fetch.clone(),
            mail_recipients: config.mail.recipients.len(),
            sample_mode: config.sample_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "harvester.db");
        assert_eq!(config.scheduler.tick_interval_ms, 200);
        assert_eq!(config.scheduler.max_parallel_harvests, 4);
        assert_eq!(config.scheduler.failed_retry_delay_secs, 300);
        assert_eq!(config.errorflow.max_consecutive_download_failures, 10);
        assert!(config.storage.processing.is_none());
        assert!(config.sample_mode.is_none());
    }

    #[test]
    fn test_deserialize_storage_and_scheduler() {
        let toml = r#"
sample_mode = 5

[storage]
processing = "/data/processing"
done = "/data/done"
rejected = "/data/rejected"

[scheduler]
max_parallel_downloads = 2
download_queue_fill_delay_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.storage.processing.as_deref().unwrap().to_str(),
            Some("/data/processing")
        );
        assert_eq!(config.scheduler.max_parallel_downloads, 2);
        assert_eq!(config.scheduler.download_queue_fill_delay_ms, 250);
        assert_eq!(config.scheduler.max_parallel_harvests, 4);
        assert_eq!(config.sample_mode, Some(5));
    }

    #[test]
    fn test_sanitized_config_hides_recipients() {
        let config = Config {
            mail: MailConfig {
                recipients: vec!["ops@example.org".to_string()],
                sender: None,
            },
            ..Default::default()
        };
        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.mail_recipients, 1);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("ops@example.org"));
    }
}
