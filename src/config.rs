//! Backend configuration parsed from environment variables.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::sync::retry::RetryConfig;

pub const DEFAULT_BIND: &str = "0.0.0.0:5004";
pub const DEFAULT_DATA_DIR: &str = "./presenter-data";
pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub api_base_url: String,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl BackendConfig {
    /// Build config from the process environment.
    ///
    /// Optional:
    /// - `PRESENTER_BIND`: listen address, default `0.0.0.0:5004`
    /// - `PRESENTER_DATA_DIR`: local store and show file directory
    /// - `PRESENTER_API_URL`: admin/template backend base URL
    /// - `PRESENTER_SYNC_INTERVAL_SECS`: default 30
    /// - `PRESENTER_REQUEST_TIMEOUT_SECS`: default 30
    /// - `PRESENTER_MAX_RETRIES`, `PRESENTER_RETRY_INITIAL_MS`,
    ///   `PRESENTER_RETRY_MAX_MS`, `PRESENTER_RETRY_MULTIPLIER`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RetryConfig::default();

        let bind_addr = parse_or("PRESENTER_BIND", &lookup, DEFAULT_BIND.parse().ok())?;
        let data_dir = lookup("PRESENTER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let api_base_url = lookup("PRESENTER_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let sync_interval = Duration::from_secs(parse_nonzero(
            "PRESENTER_SYNC_INTERVAL_SECS",
            &lookup,
            DEFAULT_SYNC_INTERVAL_SECS,
        )?);
        let request_timeout = Duration::from_secs(parse_nonzero(
            "PRESENTER_REQUEST_TIMEOUT_SECS",
            &lookup,
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);

        let retry = RetryConfig {
            max_retries: parse_or("PRESENTER_MAX_RETRIES", &lookup, Some(defaults.max_retries))?,
            initial_delay: Duration::from_millis(parse_or(
                "PRESENTER_RETRY_INITIAL_MS",
                &lookup,
                Some(defaults.initial_delay.as_millis() as u64),
            )?),
            max_delay: Duration::from_millis(parse_or(
                "PRESENTER_RETRY_MAX_MS",
                &lookup,
                Some(defaults.max_delay.as_millis() as u64),
            )?),
            backoff_multiplier: parse_or(
                "PRESENTER_RETRY_MULTIPLIER",
                &lookup,
                Some(defaults.backoff_multiplier),
            )?,
            ..defaults
        };

        Ok(Self {
            bind_addr,
            data_dir,
            api_base_url,
            sync_interval,
            request_timeout,
            retry,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("local_storage.json")
    }

    pub fn show_path(&self) -> PathBuf {
        self.data_dir.join("show.json")
    }
}

fn parse_or<T, F>(var: &'static str, lookup: &F, default: Option<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => default.ok_or(ConfigError::Invalid {
            var,
            value: String::new(),
        }),
    }
}

fn parse_nonzero<F>(var: &'static str, lookup: &F, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(var, lookup, Some(default))? {
        0 => Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        }),
        value => Ok(value),
    }
}
