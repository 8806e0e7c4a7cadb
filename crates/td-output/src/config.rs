// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::destination::DestinationPattern;
use crate::errors::OutputError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_JOURNAL_CHUNK_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_EMITTER_QUEUE_SIZE: usize = 128;

/// Configuration of the remote output stage
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Import endpoint, host or URL. `None` uses the public API host
    pub endpoint: Option<String>,
    /// API key sent with every import
    pub api_key: String,
    /// Use https when the endpoint carries no scheme
    pub use_ssl: bool,
    /// HTTP proxy URL
    pub http_proxy: Option<String>,
    pub connection_timeout: Duration,
    /// Upper bound of a whole import request
    pub write_timeout: Duration,
    /// Reserved. Failed chunks are retried on the next flush tick.
    pub retry_interval: Duration,
    /// Period of every spooler's flush
    pub flush_interval: Duration,
    /// Storage location handed to the journal group factory
    pub journal_group_path: PathBuf,
    pub max_journal_chunk_size: usize,
    /// Database name, `*` follows the tag
    pub database_name: DestinationPattern,
    /// Table name, `*` follows the tag
    pub table_name: DestinationPattern,
    /// Directory for compressed blobs that outgrow memory
    pub temp_dir: PathBuf,
    /// Flush each journal one last time before it is disposed at shutdown
    pub flush_on_shutdown: bool,
    /// Capacity of the queue between `Output::emit` and the emitter
    pub emitter_queue_size: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: String::new(),
            use_ssl: true,
            http_proxy: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            journal_group_path: env::temp_dir().join("td-output"),
            max_journal_chunk_size: DEFAULT_MAX_JOURNAL_CHUNK_SIZE,
            database_name: DestinationPattern::Wildcard,
            table_name: DestinationPattern::Wildcard,
            temp_dir: env::temp_dir(),
            flush_on_shutdown: true,
            emitter_queue_size: DEFAULT_EMITTER_QUEUE_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl OutputConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, OutputError> {
        let defaults = Self::default();
        let config = Self {
            endpoint: env::var("TD_ENDPOINT").ok().filter(|v| !v.is_empty()),
            api_key: env::var("TD_API_KEY").unwrap_or_default(),
            use_ssl: env_bool("TD_USE_SSL").unwrap_or(defaults.use_ssl),
            http_proxy: env::var("TD_HTTP_PROXY")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok()
                .filter(|v| !v.is_empty()),
            connection_timeout: env_secs("TD_CONNECTION_TIMEOUT")?
                .unwrap_or(defaults.connection_timeout),
            write_timeout: env_secs("TD_WRITE_TIMEOUT")?.unwrap_or(defaults.write_timeout),
            retry_interval: env_secs("TD_RETRY_INTERVAL")?.unwrap_or(defaults.retry_interval),
            flush_interval: env_secs("TD_FLUSH_INTERVAL")?.unwrap_or(defaults.flush_interval),
            journal_group_path: env::var("TD_JOURNAL_GROUP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.journal_group_path),
            max_journal_chunk_size: env_parse("TD_MAX_JOURNAL_CHUNK_SIZE")?
                .unwrap_or(defaults.max_journal_chunk_size),
            database_name: env::var("TD_DATABASE")
                .map(|v| DestinationPattern::parse(&v))
                .unwrap_or(defaults.database_name),
            table_name: env::var("TD_TABLE")
                .map(|v| DestinationPattern::parse(&v))
                .unwrap_or(defaults.table_name),
            temp_dir: env::var("TD_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            flush_on_shutdown: env_bool("TD_FLUSH_ON_SHUTDOWN")
                .unwrap_or(defaults.flush_on_shutdown),
            emitter_queue_size: env_parse("TD_EMITTER_QUEUE_SIZE")?
                .unwrap_or(defaults.emitter_queue_size),
            log_level: env::var("TD_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), OutputError> {
        if self.flush_interval.is_zero() {
            return Err(OutputError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        if self.max_journal_chunk_size == 0 {
            return Err(OutputError::InvalidConfig(
                "Maximum journal chunk size must be greater than 0".to_string(),
            ));
        }

        if self.emitter_queue_size == 0 {
            return Err(OutputError::InvalidConfig(
                "Emitter queue size must be greater than 0".to_string(),
            ));
        }

        for (what, pattern) in [("database", &self.database_name), ("table", &self.table_name)] {
            if matches!(pattern, DestinationPattern::Fixed(name) if name.trim().is_empty()) {
                return Err(OutputError::InvalidConfig(format!(
                    "The {what} name cannot be empty"
                )));
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(OutputError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|val| {
        let val = val.to_lowercase();
        val != "false" && val != "0"
    })
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, OutputError> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| OutputError::InvalidConfig(format!("{name} is not a valid number: '{val}'"))),
        Err(_) => Ok(None),
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>, OutputError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_secs))
}
