use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::logging::LogFormat;

pub const ENV_API_URL: &str = "SHOPDESK_API_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "SHOPDESK_REQUEST_TIMEOUT_MS";
pub const ENV_REFETCH_ON_NOT_FOUND: &str = "SHOPDESK_REFETCH_ON_NOT_FOUND";
pub const ENV_REFETCH_AFTER_COMMIT: &str = "SHOPDESK_REFETCH_AFTER_COMMIT";
pub const ENV_LOG_FORMAT: &str = "SHOPDESK_LOG_FORMAT";

const DEFAULT_API_URL: &str = "http://localhost:3001/api";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Client settings for the coordinator and HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL that REST paths are appended to.
    pub api_url: String,
    pub request_timeout: Duration,
    /// Refresh the collection after a mutation hits a deleted entity.
    pub refetch_on_not_found: bool,
    /// Refresh the collection after every successful commit.
    pub refetch_after_commit: bool,
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            refetch_on_not_found: true,
            refetch_after_commit: false,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// defaults; set but unparsable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_URL) {
            let url = url.trim().trim_end_matches('/');
            if url.is_empty() {
                return Err(ConfigError::Empty(ENV_API_URL));
            }
            config.api_url = url.to_string();
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            let ms = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidValue { name: ENV_REQUEST_TIMEOUT_MS, value: raw.clone() })?;
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(ENV_REFETCH_ON_NOT_FOUND) {
            config.refetch_on_not_found = parse_bool(ENV_REFETCH_ON_NOT_FOUND, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REFETCH_AFTER_COMMIT) {
            config.refetch_after_commit = parse_bool(ENV_REFETCH_AFTER_COMMIT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log_format = LogFormat::parse(&raw)
                .ok_or(ConfigError::InvalidValue { name: ENV_LOG_FORMAT, value: raw.clone() })?;
        }

        Ok(config)
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value: raw.to_string() }),
    }
}
