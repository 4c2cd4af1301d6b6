//! Process configuration.
//!
//! Loaded from `REEF_*` environment variables; every option has a default
//! suitable for local development except TLS, which is off unless both the
//! certificate and the key are configured.

use std::path::PathBuf;
use std::time::Duration;

use reef_reconciler::RunnerConfig;
use reef_scheduler::SchedulerConfig;

/// A configuration value could not be parsed or validated.
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Configuration of the reef service process.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listening port.
    pub port: u16,
    /// Path to the TLS certificate file; TLS is enabled when both paths are
    /// set.
    pub ssl_crt: Option<PathBuf>,
    /// Path to the TLS key file.
    pub ssl_key: Option<PathBuf>,
    /// Enables pretty log output and verbose diagnostics.
    pub debug: bool,
    /// Persistence DSN; reserved for the external persistence driver. The
    /// bundled stores are in-memory.
    pub database_url: Option<String>,
    /// Directory holding pre-rendered component charts.
    pub charts_dir: PathBuf,
    /// Scheduler tuning.
    pub scheduler: SchedulerConfig,
    /// Runner tuning (includes status updater and progress tracker).
    pub runner: RunnerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            ssl_crt: None,
            ssl_key: None,
            debug: false,
            database_url: None,
            charts_dir: PathBuf::from("./charts"),
            scheduler: SchedulerConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported variables:
    /// - `REEF_PORT`
    /// - `REEF_SSL_CRT` / `REEF_SSL_KEY`
    /// - `REEF_DEBUG`
    /// - `REEF_DATABASE_URL`
    /// - `REEF_CHARTS_DIR`
    /// - `REEF_PRE_COMPONENTS` (comma-separated component names)
    /// - `REEF_SCHEDULER_TICK_INTERVAL` (e.g. `30s`)
    /// - `REEF_SCHEDULER_POOL_SIZE`
    /// - `REEF_SCHEDULER_MAX_OPERATION_RETRIES`
    /// - `REEF_SCHEDULER_ORPHAN_TIMEOUT`
    /// - `REEF_RUNNER_MAX_RETRIES`
    /// - `REEF_RUNNER_RETRY_DELAY`
    /// - `REEF_STATUS_INTERVAL`
    /// - `REEF_STATUS_MAX_RETRIES`
    /// - `REEF_STATUS_RETRY_DELAY`
    /// - `REEF_PROGRESS_INTERVAL`
    /// - `REEF_PROGRESS_TIMEOUT`
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is present but cannot be parsed, or
    /// when the combination is invalid (e.g. a TLS certificate without a
    /// key).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(port) = env_u16("REEF_PORT")? {
            config.port = port;
        }
        config.ssl_crt = env_string("REEF_SSL_CRT").map(PathBuf::from);
        config.ssl_key = env_string("REEF_SSL_KEY").map(PathBuf::from);
        if let Some(debug) = env_bool("REEF_DEBUG")? {
            config.debug = debug;
        }
        config.database_url = env_string("REEF_DATABASE_URL");
        if let Some(dir) = env_string("REEF_CHARTS_DIR") {
            config.charts_dir = PathBuf::from(dir);
        }

        if let Some(value) = env_string("REEF_PRE_COMPONENTS") {
            config.scheduler.pre_components = parse_component_list(&value);
        }
        if let Some(interval) = env_duration("REEF_SCHEDULER_TICK_INTERVAL")? {
            config.scheduler.tick_interval = interval;
        }
        if let Some(size) = env_usize("REEF_SCHEDULER_POOL_SIZE")? {
            config.scheduler.pool_size = size;
        }
        if let Some(retries) = env_u32("REEF_SCHEDULER_MAX_OPERATION_RETRIES")? {
            config.scheduler.max_operation_retries = retries;
        }
        if let Some(timeout) = env_duration("REEF_SCHEDULER_ORPHAN_TIMEOUT")? {
            config.scheduler.orphan_timeout = timeout;
        }

        if let Some(retries) = env_u32("REEF_RUNNER_MAX_RETRIES")? {
            config.runner.max_retries = retries;
        }
        if let Some(delay) = env_duration("REEF_RUNNER_RETRY_DELAY")? {
            config.runner.retry_delay = delay;
        }
        if let Some(interval) = env_duration("REEF_STATUS_INTERVAL")? {
            config.runner.status_updater.interval = interval;
        }
        if let Some(retries) = env_u32("REEF_STATUS_MAX_RETRIES")? {
            config.runner.status_updater.max_retries = retries;
        }
        if let Some(delay) = env_duration("REEF_STATUS_RETRY_DELAY")? {
            config.runner.status_updater.retry_delay = delay;
        }
        if let Some(interval) = env_duration("REEF_PROGRESS_INTERVAL")? {
            config.runner.progress.interval = interval;
        }
        if let Some(timeout) = env_duration("REEF_PROGRESS_TIMEOUT")? {
            config.runner.progress.timeout = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssl_crt.is_some() != self.ssl_key.is_some() {
            return Err(ConfigError::new(
                "REEF_SSL_CRT and REEF_SSL_KEY must be set together",
            ));
        }
        if self.scheduler.pool_size == 0 {
            return Err(ConfigError::new(
                "REEF_SCHEDULER_POOL_SIZE must be greater than 0",
            ));
        }
        if self.scheduler.max_operation_retries == 0 {
            return Err(ConfigError::new(
                "REEF_SCHEDULER_MAX_OPERATION_RETRIES must be greater than 0",
            ));
        }
        if self.runner.max_retries == 0 {
            return Err(ConfigError::new(
                "REEF_RUNNER_MAX_RETRIES must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Returns true when TLS is configured.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.ssl_crt.is_some() && self.ssl_key.is_some()
    }
}

fn parse_component_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| ConfigError::new(format!("{name} must be a port number: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| ConfigError::new(format!("{name} must be an unsigned integer: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| ConfigError::new(format!("{name} must be an unsigned integer: {e}")))
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::new(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_duration(name: &str) -> Result<Option<Duration>, ConfigError> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_duration_value(name, &v).map(Some)
}

fn parse_duration_value(name: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value)
        .map_err(|e| ConfigError::new(format!("{name} must be a duration (e.g. 30s, 5m): {e}")))
}
