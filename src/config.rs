//! Configuration loading
//!
//! Settings come from an optional TOML file (`config.toml` in the XDG config
//! directory, or an explicit `--config` path) and are then overridden by
//! environment variables. Credentials are only checked when a request is made,
//! so a missing key doesn't stop the program from starting.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::apod::APOD_API_BASE;
use crate::data::RetryPolicy;

/// Server-side credential
pub const SERVER_KEY_ENV: &str = "NASA_API_KEY";

/// Browser-facing credential (same upstream key, exposed separately)
pub const PUBLIC_KEY_ENV: &str = "NASA_PUBLIC_API_KEY";

/// Overrides the upstream endpoint
pub const API_BASE_ENV: &str = "APOD_API_BASE";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file doesn't exist
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// The config file couldn't be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file isn't valid TOML for `Config`
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which of the two credentials a client should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialScope {
    /// Server-rendered calls (`NASA_API_KEY`)
    #[default]
    Server,
    /// Browser-initiated calls (`NASA_PUBLIC_API_KEY`)
    Public,
}

impl CredentialScope {
    /// Environment variable holding this scope's key
    pub fn env_var(self) -> &'static str {
        match self {
            CredentialScope::Server => SERVER_KEY_ENV,
            CredentialScope::Public => PUBLIC_KEY_ENV,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// APOD endpoint
    pub api_base: String,
    /// Server-side API key
    pub api_key: Option<String>,
    /// Browser-facing API key
    pub public_api_key: Option<String>,
    /// Attempts per request
    pub attempts: u32,
    /// Per-attempt timeout in seconds
    pub attempt_timeout_secs: u64,
    /// Pause between attempts in seconds
    pub retry_delay_secs: u64,
    /// Where downloads are written (current directory if unset)
    pub download_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            api_base: APOD_API_BASE.to_string(),
            api_key: None,
            public_api_key: None,
            attempts: policy.attempts,
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
            retry_delay_secs: policy.retry_delay.as_secs(),
            download_dir: None,
        }
    }
}

impl Config {
    /// Default config file location (`~/.config/cosmic-timeline/config.toml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "cosmic-timeline")?;
        Some(project_dirs.config_dir().join("config.toml"))
    }

    /// Loads the config file
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies overrides from the process environment
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup` (non-empty values win over the file)
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_blank(SERVER_KEY_ENV) {
            self.api_key = Some(key);
        }
        if let Some(key) = non_blank(PUBLIC_KEY_ENV) {
            self.public_api_key = Some(key);
        }
        if let Some(base) = non_blank(API_BASE_ENV) {
            self.api_base = base;
        }
        self
    }

    /// The key for `scope`, if one is set and not blank
    pub fn credential(&self, scope: CredentialScope) -> Option<String> {
        let key = match scope {
            CredentialScope::Server => self.api_key.as_deref(),
            CredentialScope::Public => self.public_api_key.as_deref(),
        };
        key.map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.max(1),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    /// Directory for downloads
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}
