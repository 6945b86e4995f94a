//! Typed configuration.
//!
//! Process settings load once from environment variables and fail fast if
//! required vars are missing. Sensitive values are wrapped in
//! secrecy::SecretString to prevent log leaks. Dispatcher tuning lives in
//! [`DispatchConfig`], optionally read from a TOML file.

pub mod secrets;

use crate::engine::admission::AdmissionConfig;
use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Production endpoint of the margin estimator API.
pub const DEFAULT_BASE_URL: &str =
    "https://api.developer.deutsche-boerse.com/prod/prisma-margin-estimator-2-0/2.0.0/";

#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub base_url: String,
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, the scheduler's environment provides the vars.
    /// `PRISMA_API_KEY` has no default.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: SecretString::from(required_var("PRISMA_API_KEY")?),
            base_url: std::env::var("PRISMA_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Config(format!(
            "required environment variable {name} is not set"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Dispatcher tuning
// ---------------------------------------------------------------------------

/// Tuning for one dispatcher run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Size of the long-lived worker pool.
    pub max_concurrency: usize,
    /// Per-call timeout in seconds.
    pub call_timeout_secs: u64,
    /// Idle HTTP connections kept per host. Independent of `max_concurrency`.
    pub pool_max_idle_per_host: usize,
    /// Interval between progress log lines; 0 disables the reporter.
    pub progress_interval_secs: u64,
    pub retry: RetryConfig,
    pub admission: AdmissionConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 15,
            call_timeout_secs: 10,
            pool_max_idle_per_host: 25,
            progress_interval_secs: 10,
            retry: RetryConfig::default(),
            admission: AdmissionConfig::default(),
        }
    }
}

/// Bounded retry policy for a single item.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per item, including the first.
    pub max_attempts: u32,
    /// Linear backoff step: the wait after attempt `n` is `n * base_delay_ms`.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff wait.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Wait before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .base_delay_ms
            .saturating_mul(u64::from(attempt))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

impl DispatchConfig {
    /// Load tuning from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read dispatch config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad dispatch config {}: {e}", path.display())))
    }

    /// Parse tuning from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Reject settings the dispatcher cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::Config("call_timeout_secs must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Config(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        self.admission.validate()
    }
}
