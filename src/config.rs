//! TOML configuration.
//!
//! Every section except `[db]` and `[server]` has defaults, so a minimal
//! config only needs those two. See `config/atlascope.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{lookback_days, lookback_hours, MAX_LOOKBACK_DAYS};

/// Upper bound for every configured period, in seconds.
const MAX_PERIOD_SECS: u64 = MAX_LOOKBACK_DAYS as u64 * 86_400;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub base_url: String,
    #[serde(default = "default_appname")]
    pub appname: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    #[serde(default = "default_backfill_days")]
    pub backfill_days: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_language")]
    pub accepted_language: String,
    #[serde(default = "default_title_patterns")]
    pub excluded_title_patterns: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_url(),
            appname: default_appname(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            lookback_hours: default_lookback_hours(),
            backfill_days: default_backfill_days(),
            timeout_secs: default_timeout_secs(),
            accepted_language: default_language(),
            excluded_title_patterns: default_title_patterns(),
        }
    }
}

impl FeedConfig {
    /// Only meaningful on a config that passed [`load_config`].
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_feed_url() -> String {
    "https://api.reliefweb.int/v1/reports".to_string()
}
fn default_appname() -> String {
    "atlascope".to_string()
}
fn default_page_size() -> usize {
    1000
}
fn default_max_pages() -> usize {
    1000
}
fn default_lookback_hours() -> i64 {
    4
}
fn default_backfill_days() -> i64 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_language() -> String {
    "English".to_string()
}
fn default_title_patterns() -> Vec<String> {
    vec!["Location Map".to_string(), "Monthly Snapshot".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_ceiling")]
    pub ceiling: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_quota_backend")]
    pub backend: String,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            window_secs: default_window_secs(),
            backend: default_quota_backend(),
            redis_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

impl QuotaConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_ceiling() -> u64 {
    4
}
fn default_window_secs() -> u64 {
    86_400
}
fn default_quota_backend() -> String {
    "memory".to_string()
}
fn default_key_prefix() -> String {
    "atlascope:quota".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_query_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_query_timeout_secs(),
            max_rows: default_max_rows(),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_query_timeout_secs() -> u64 {
    15
}
fn default_max_rows() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_ttl_secs as i64)
    }
}

fn default_interval_secs() -> u64 {
    3 * 60 * 60
}
fn default_lock_ttl_secs() -> u64 {
    60 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Feed paging
    if config.feed.page_size == 0 || config.feed.page_size > 1000 {
        anyhow::bail!("feed.page_size must be in 1..=1000");
    }
    if config.feed.max_pages == 0 {
        anyhow::bail!("feed.max_pages must be >= 1");
    }
    lookback_hours(config.feed.lookback_hours)
        .map_err(|e| anyhow::anyhow!("feed.lookback_hours: {}", e))?;
    lookback_days(config.feed.backfill_days)
        .map_err(|e| anyhow::anyhow!("feed.backfill_days: {}", e))?;

    // Model
    match config.model.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.model.is_enabled() && config.model.model.is_none() {
        anyhow::bail!(
            "model.model must be specified when provider is '{}'",
            config.model.provider
        );
    }

    // Quota
    if config.quota.ceiling == 0 {
        anyhow::bail!("quota.ceiling must be >= 1");
    }
    if config.quota.window_secs == 0 || config.quota.window_secs > MAX_PERIOD_SECS {
        anyhow::bail!("quota.window_secs must be in 1..={}", MAX_PERIOD_SECS);
    }
    match config.quota.backend.as_str() {
        "memory" => {}
        "redis" => {
            if config.quota.redis_url.is_none() {
                anyhow::bail!("quota.redis_url must be set when backend is 'redis'");
            }
        }
        other => anyhow::bail!(
            "Unknown quota backend: '{}'. Must be memory or redis.",
            other
        ),
    }

    if config.query.max_rows == 0 {
        anyhow::bail!("query.max_rows must be >= 1");
    }
    if config.schedule.interval_secs == 0 || config.schedule.interval_secs > MAX_PERIOD_SECS {
        anyhow::bail!("schedule.interval_secs must be in 1..={}", MAX_PERIOD_SECS);
    }
    if config.schedule.lock_ttl_secs == 0 || config.schedule.lock_ttl_secs > MAX_PERIOD_SECS {
        anyhow::bail!("schedule.lock_ttl_secs must be in 1..={}", MAX_PERIOD_SECS);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/atlascope.sqlite"

[server]
bind = "127.0.0.1:8080"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.feed.page_size, 1000);
        assert_eq!(config.feed.lookback_hours, 4);
        assert_eq!(config.feed.accepted_language, "English");
        assert_eq!(config.quota.ceiling, 4);
        assert_eq!(config.quota.window_secs, 86_400);
        assert!(!config.model.is_enabled());
        assert_eq!(config.schedule.interval_secs, 10_800);
    }

    #[test]
    fn test_rejects_oversized_page() {
        let src = format!("{}\n[feed]\npage_size = 5000\n", MINIMAL);
        let config: Config = toml::from_str(&src).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_openai_requires_model() {
        let src = format!("{}\n[model]\nprovider = \"openai\"\n", MINIMAL);
        let config: Config = toml::from_str(&src).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("model.model"));
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let src = format!("{}\n[quota]\nbackend = \"redis\"\n", MINIMAL);
        let config: Config = toml::from_str(&src).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_unbounded_lookbacks() {
        let src = format!("{}\n[feed]\nbackfill_days = 100000000\n", MINIMAL);
        let config: Config = toml::from_str(&src).unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("feed.backfill_days"));

        let src = format!("{}\n[feed]\nlookback_hours = 9223372036854775807\n", MINIMAL);
        let config: Config = toml::from_str(&src).unwrap();
        assert!(validate(&config).is_err());

        let src = format!("{}\n[schedule]\nlock_ttl_secs = 9223372036854775807\n", MINIMAL);
        let config: Config = toml::from_str(&src).unwrap();
        assert!(validate(&config).is_err());
    }
}
