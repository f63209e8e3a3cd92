//! The bridge config document: generated by `--init`, read at server start.
//! Both sides validate through [`ConfigDocument::validate`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::redact::mask_sensitive;

pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const CONFIG_DIR_NAME: &str = ".requirements-mcp";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {}", mask_sensitive(&.0.to_string()))]
    Parse(#[from] serde_json::Error),

    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("backend_api_url '{}' is not a valid URL: {reason}", mask_sensitive(.url))]
    InvalidUrl { url: String, reason: String },

    #[error("request_timeout '{value}' is not a duration: {reason}")]
    InvalidTimeout { value: String, reason: String },

    #[error("log_level '{0}' must be one of debug, info, warn, error")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk config, field for field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub backend_api_url: String,
    #[serde(default)]
    pub pat_token: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_request_timeout() -> String {
    DEFAULT_REQUEST_TIMEOUT.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// A document that passed validation, with typed fields.
#[derive(Clone)]
pub struct ValidatedConfig {
    pub backend_api_url: Url,
    pub pat_token: String,
    pub request_timeout: Duration,
    pub log_level: LogLevel,
}

impl ConfigDocument {
    /// Fresh document with default timeout and log level.
    pub fn new(backend_api_url: impl Into<String>, pat_token: impl Into<String>) -> Self {
        Self {
            backend_api_url: backend_api_url.into(),
            pat_token: pat_token.into(),
            request_timeout: default_request_timeout(),
            log_level: default_log_level(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Pretty-printed with two-space indent and a trailing newline.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let raw_url = self.backend_api_url.trim();
        if raw_url.is_empty() {
            return Err(ConfigError::MissingField("backend_api_url"));
        }
        let backend_api_url = Url::parse(raw_url).map_err(|e| ConfigError::InvalidUrl {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;

        if self.pat_token.trim().is_empty() {
            return Err(ConfigError::MissingField("pat_token"));
        }

        let raw_timeout = if self.request_timeout.trim().is_empty() {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            self.request_timeout.trim()
        };
        let request_timeout =
            humantime::parse_duration(raw_timeout).map_err(|e| ConfigError::InvalidTimeout {
                value: raw_timeout.to_string(),
                reason: e.to_string(),
            })?;

        let log_level = if self.log_level.trim().is_empty() {
            LogLevel::default()
        } else {
            self.log_level.trim().parse()?
        };

        Ok(ValidatedConfig {
            backend_api_url,
            pat_token: self.pat_token.clone(),
            request_timeout,
            log_level,
        })
    }
}

impl fmt::Debug for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDocument")
            .field("backend_api_url", &self.backend_api_url)
            .field("pat_token", &"***")
            .field("request_timeout", &self.request_timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("backend_api_url", &self.backend_api_url.as_str())
            .field("pat_token", &"***")
            .field("request_timeout", &self.request_timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}
