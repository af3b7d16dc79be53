//! On-disk settings at `~/.config/echox.json` with environment overrides.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::constants::{
    DEFAULT_API_BASE, DEFAULT_LEGACY_UPLOAD_BASE, DEFAULT_POST_TEXT, POST_MAX_RETRIES,
    POST_RETRY_BASE_DELAY, REQUEST_TIMEOUT_SECS,
};
use crate::media::VideoQuality;
use crate::services::{Endpoints, RetryPolicy, StatusStrategy, UploadProtocol};

pub const API_BASE_ENV: &str = "ECHOX_API_BASE";
pub const UPLOAD_BASE_ENV: &str = "ECHOX_UPLOAD_BASE";
pub const ACCESS_TOKEN_ENV: &str = "ECHOX_ACCESS_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot locate home directory for ~/.config/echox.json")]
    NoHome,

    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{field} is not a valid URL ({value}): {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub legacy_upload_base: String,
    pub protocol: UploadProtocol,
    pub request_timeout_secs: u64,
    pub status_strategy: StatusStrategy,
    pub post_max_retries: u32,
    pub post_retry_base_secs: u64,
    pub video_quality: VideoQuality,
    pub default_caption: String,
    pub ffmpeg_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            legacy_upload_base: DEFAULT_LEGACY_UPLOAD_BASE.to_string(),
            protocol: UploadProtocol::default(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            status_strategy: StatusStrategy::default(),
            post_max_retries: POST_MAX_RETRIES,
            post_retry_base_secs: POST_RETRY_BASE_DELAY.as_secs(),
            video_quality: VideoQuality::default(),
            default_caption: DEFAULT_POST_TEXT.to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            access_token: None,
            token_expires_at: None,
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        path.push(".config");
        path.push("echox.json");
        Ok(path)
    }

    /// Loads the default config file, applies environment overrides and
    /// validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(&Self::default_path()?)
    }

    /// [`Config::load`] against an explicit file.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("[config] {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment wins over the file for base URLs and the token.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(API_BASE_ENV) {
            self.api_base = url;
        }
        if let Some(url) = non_empty(UPLOAD_BASE_ENV) {
            self.legacy_upload_base = url;
        }
        if let Some(token) = non_empty(ACCESS_TOKEN_ENV) {
            self.access_token = Some(token.trim().to_string());
            self.token_expires_at = None;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("api_base", &self.api_base),
            ("legacy_upload_base", &self.legacy_upload_base),
        ] {
            Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
                field,
                value: value.clone(),
                source,
            })?;
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "request_timeout_secs",
            });
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.api_base, &self.legacy_upload_base)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.post_max_retries,
            Duration::from_secs(self.post_retry_base_secs),
        )
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        fs::write(path, payload).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Stores a token in the config file at `path`, preserving other settings.
pub fn save_access_token(
    path: &Path,
    token: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Config, ConfigError> {
    let mut config = Config::load_from(path)?;
    config.access_token = Some(token.trim().to_string());
    config.token_expires_at = expires_at;
    config.save_to(path)?;
    info!("[config] saved access token to {}", path.display());
    Ok(config)
}
