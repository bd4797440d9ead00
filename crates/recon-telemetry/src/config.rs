// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TELEMETRY_KEY: &str = "telemetry";
/// Number of entries the bounded store retains.
pub const DEFAULT_TELEMETRY_MAX_ENTRIES: usize = 100;
pub const DEFAULT_QUERY_MAX_CONNECTIONS: usize = 8;
pub const MAX_STORE_RETRIES: u32 = 10;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Which bounded store backend the process runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::InvalidValue {
                name: "RECON_STORE",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    /// how many analytical reads may be in flight at once
    pub max_connections: usize,
    pub query_timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        ClickHouseConfig {
            url: "http://127.0.0.1:8123".to_string(),
            user: "default".to_string(),
            password: String::new(),
            database: "default".to_string(),
            max_connections: DEFAULT_QUERY_MAX_CONNECTIONS,
            query_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// upper bound for ingress request bodies, in bytes. None accepts any size.
    pub max_request_content_length: Option<usize>,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    /// logical name of the capped list
    pub telemetry_key: String,
    pub telemetry_max_entries: usize,
    /// additional append attempts after the first failure
    pub store_max_retries: u32,
    pub store_retry_backoff_base_ms: u64,
    pub clickhouse: ClickHouseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            max_request_content_length: None,
            store_backend: StoreBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            telemetry_key: DEFAULT_TELEMETRY_KEY.to_string(),
            telemetry_max_entries: DEFAULT_TELEMETRY_MAX_ENTRIES,
            store_max_retries: 0,
            store_retry_backoff_base_ms: 100,
            clickhouse: ClickHouseConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let clickhouse_defaults = ClickHouseConfig::default();

        let config = Config {
            host: env::var("RECON_HOST").unwrap_or(defaults.host),
            port: parse_env("RECON_PORT")?.unwrap_or(defaults.port),
            log_level: env::var("RECON_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            max_request_content_length: parse_env("RECON_MAX_REQUEST_BYTES")?,
            store_backend: match env::var("RECON_STORE") {
                Ok(val) => val.parse()?,
                Err(_) => defaults.store_backend,
            },
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            telemetry_key: env::var("RECON_TELEMETRY_KEY").unwrap_or(defaults.telemetry_key),
            telemetry_max_entries: parse_env("RECON_TELEMETRY_MAX_ENTRIES")?
                .unwrap_or(defaults.telemetry_max_entries),
            store_max_retries: parse_env("RECON_STORE_MAX_RETRIES")?
                .unwrap_or(defaults.store_max_retries),
            store_retry_backoff_base_ms: parse_env("RECON_STORE_RETRY_BACKOFF_MS")?
                .unwrap_or(defaults.store_retry_backoff_base_ms),
            clickhouse: ClickHouseConfig {
                url: env::var("CLICKHOUSE_URL").unwrap_or(clickhouse_defaults.url),
                user: env::var("CLICKHOUSE_USER").unwrap_or(clickhouse_defaults.user),
                password: env::var("CLICKHOUSE_PASSWORD").unwrap_or(clickhouse_defaults.password),
                database: env::var("CLICKHOUSE_DATABASE").unwrap_or(clickhouse_defaults.database),
                max_connections: parse_env("RECON_QUERY_MAX_CONNECTIONS")?
                    .unwrap_or(clickhouse_defaults.max_connections),
                query_timeout: parse_env("RECON_QUERY_TIMEOUT_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(clickhouse_defaults.query_timeout),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.telemetry_max_entries == 0 {
            return Err(ConfigError::InvalidConfig(
                "RECON_TELEMETRY_MAX_ENTRIES must be greater than 0".to_string(),
            ));
        }

        if self.store_max_retries > MAX_STORE_RETRIES {
            return Err(ConfigError::InvalidConfig(format!(
                "RECON_STORE_MAX_RETRIES must be at most {MAX_STORE_RETRIES}"
            )));
        }

        if self.telemetry_key.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "RECON_TELEMETRY_KEY cannot be empty".to_string(),
            ));
        }

        if self.clickhouse.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "RECON_QUERY_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(None),
    }
}
