//! Access token sources. Tokens are acquired and refreshed elsewhere; the
//! pipeline only reads them.

use chrono::{DateTime, Utc};
use log::debug;

use crate::config::Config;

pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

/// A token handed over directly, e.g. on the command line.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Option<String> {
        let token = self.token.trim();
        (!token.is_empty()).then(|| token.to_string())
    }
}

/// Token persisted in the config file alongside its expiry.
#[derive(Debug, Clone, Default)]
pub struct StoredTokenProvider {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredTokenProvider {
    pub fn new(token: Option<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.access_token.clone(), config.token_expires_at)
    }

    /// Token usable at `now`. A missing expiry means the token does not expire.
    pub fn token_at(&self, now: DateTime<Utc>) -> Option<String> {
        let token = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        match self.expires_at {
            Some(expires_at) if expires_at < now => {
                debug!("[auth] stored token expired at {expires_at}");
                None
            }
            _ => Some(token.to_string()),
        }
    }
}

impl TokenProvider for StoredTokenProvider {
    fn access_token(&self) -> Option<String> {
        self.token_at(Utc::now())
    }
}
