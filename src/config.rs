//! Process configuration, loaded once at startup (§1 ambient stack).

use thiserror::Error;

const DEFAULT_TICK_SECS: u64 = 30;
const DEFAULT_STALE_THRESHOLD_SECS: i64 = 15 * 60;
const DEFAULT_CALL_MAX_DURATION_SECS: i32 = 600;
const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub database_url: String,
    pub webhook_base_url: String,
    pub engine_webhook_secret: String,
    pub scheduler_tick_secs: u64,
    pub stale_call_threshold_secs: i64,
    pub call_max_duration_secs: i32,
    pub http_port: u16,
}

impl SchedulerConfig {
    /// Reads required and optional variables from the process environment.
    /// `DATABASE_URL`, `WEBHOOK_BASE_URL`, and `ENGINE_WEBHOOK_SECRET` are
    /// required; everything else falls back to the documented defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let webhook_base_url = required("WEBHOOK_BASE_URL")?;
        let engine_webhook_secret = required("ENGINE_WEBHOOK_SECRET")?;

        let scheduler_tick_secs = optional_parsed("SCHEDULER_TICK_SECS", DEFAULT_TICK_SECS)?;
        let stale_call_threshold_secs =
            optional_parsed("STALE_CALL_THRESHOLD_SECS", DEFAULT_STALE_THRESHOLD_SECS)?;
        let call_max_duration_secs =
            optional_parsed("CALL_MAX_DURATION_SECS", DEFAULT_CALL_MAX_DURATION_SECS)?;
        let http_port = optional_parsed("HTTP_PORT", DEFAULT_HTTP_PORT)?;

        Ok(Self {
            database_url,
            webhook_base_url,
            engine_webhook_secret,
            scheduler_tick_secs,
            stale_call_threshold_secs,
            call_max_duration_secs,
            http_port,
        })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::Missing(var))
}

fn optional_parsed<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}
