use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use validator::Validate;

use crate::models::Location;
use crate::retry::RetryPolicy;
use crate::source::SourceConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_SOURCE_API_URL: &str = "https://api.pos.example.com";
const DEFAULT_SINK_API_URL: &str = "http://localhost:1337";
const DEFAULT_LOOKBACK_HOURS: i64 = 2160; // 90 days
const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
const DEFAULT_QUANTITY_FLOOR: i64 = 5;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_BATCH_PAUSE_MS: u64 = 250;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_RETRY_JITTER_MS: u64 = 1_000;

/// Which write path reconciles data into the downstream store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// REST collection API (paginated, field-equality filters).
    Rest,
    /// Direct relational writes (location-scoped delete + batched insert).
    Database,
}

/// Downstream store configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    #[serde(default = "default_sink_mode")]
    pub mode: SinkMode,

    /// Base URL of the REST collection API (rest mode).
    #[serde(default = "default_sink_api_url")]
    pub api_url: String,

    /// Bearer token for the REST collection API (rest mode).
    #[serde(default)]
    pub api_token: String,

    /// Connection URL for the direct write path (database mode).
    #[serde(default)]
    pub database_url: String,
}

/// Retry behavior for source fetches and sink writes.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10))]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of the random jitter added to each backoff delay.
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            jitter_ms: DEFAULT_RETRY_JITTER_MS,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Base URL of the upstream point-of-sale API.
    #[serde(default = "default_source_api_url")]
    pub source_api_url: String,

    /// Downstream store the reconciliation writes into.
    #[serde(default = "default_sink_config")]
    #[validate]
    pub sink: SinkConfig,

    /// How far back the catalog fetch looks by last-modified time.
    #[serde(default = "default_lookback_hours")]
    #[validate(range(min = 1, max = 8784))]
    pub lookback_hours: i64,

    /// Minutes between reconciliation passes; absent means run once and exit.
    #[serde(default)]
    pub interval_minutes: Option<u64>,

    /// Fallback TTL for cache entries whose promotions carry no expiry.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Items with available quantity below this floor never reach the sink.
    #[serde(default = "default_quantity_floor")]
    pub quantity_floor: i64,

    /// Rows per sink write batch.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: usize,

    /// Scheduled pause between batches, keeping pressure off the sink.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Per-request HTTP timeout.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub retry: RetrySettings,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Statically configured locations. When empty, locations are read from
    /// the sink's locations collection instead (rest mode only).
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl AppConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_minutes.map(|m| Duration::from_secs(m * 60))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.jitter_ms),
        )
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            api_url: self.source_api_url.clone(),
            lookback_hours: self.lookback_hours,
            timeout: self.http_timeout(),
        }
    }

    /// Cross-field checks the `Validate` derive cannot express.
    fn validate_sink(&self) -> Result<(), AppConfigError> {
        match self.sink.mode {
            SinkMode::Rest => {
                if self.sink.api_url.trim().is_empty() {
                    return Err(AppConfigError::Invalid(
                        "sink.api_url is required in rest mode".into(),
                    ));
                }
                if self.sink.api_token.trim().is_empty() {
                    return Err(AppConfigError::Invalid(
                        "sink.api_token is required in rest mode".into(),
                    ));
                }
            }
            SinkMode::Database => {
                if self.sink.database_url.trim().is_empty() {
                    return Err(AppConfigError::Invalid(
                        "sink.database_url is required in database mode".into(),
                    ));
                }
                if self.locations.is_empty() {
                    return Err(AppConfigError::Invalid(
                        "database mode has no locations collection; configure [locations]".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Configuration validation failed: {0}")]
    Invalid(String),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_source_api_url() -> String {
    DEFAULT_SOURCE_API_URL.to_string()
}

fn default_sink_api_url() -> String {
    DEFAULT_SINK_API_URL.to_string()
}

fn default_sink_mode() -> SinkMode {
    SinkMode::Rest
}

fn default_sink_config() -> SinkConfig {
    SinkConfig {
        mode: default_sink_mode(),
        api_url: default_sink_api_url(),
        api_token: String::new(),
        database_url: String::new(),
    }
}

fn default_lookback_hours() -> i64 {
    DEFAULT_LOOKBACK_HOURS
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_quantity_floor() -> i64 {
    DEFAULT_QUANTITY_FLOOR
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_pause_ms() -> u64 {
    DEFAULT_BATCH_PAUSE_MS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_jitter_ms() -> u64 {
    DEFAULT_RETRY_JITTER_MS
}

/// Loads configuration: built-in defaults, then `config/default.toml` and
/// `config/{RUN_ENV}.toml` when present, then `APP__`-prefixed environment
/// variables (e.g. `APP__SINK__API_TOKEN`).
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let mut builder = Config::builder();

    if Path::new(CONFIG_DIR).exists() {
        builder = builder
            .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
            .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false));
    } else {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let cfg = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    app.validate_sink()?;
    Ok(app)
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("promo_sync={level}");
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(filter_directive));
    if json {
        let _ = registry.with(fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(fmt::layer()).try_init();
    }
}
