//! Connection options.
//!
//! Options can be built in code, deserialized from JSON, or read from the
//! environment:
//!
//! | variable               | option        |
//! |------------------------|---------------|
//! | `SWIFT_AUTH_URL`       | `auth_url`    |
//! | `SWIFT_USER_AGENT`     | `user_agent`  |
//! | `SWIFT_TIMEOUT`        | `timeout_ms` (given in whole seconds) |
//! | `RACKSPACE_SERVICENET` | `servicenet` (set to anything) |

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StorageError};

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

pub const ENV_AUTH_URL: &str = "SWIFT_AUTH_URL";
pub const ENV_USER_AGENT: &str = "SWIFT_USER_AGENT";
pub const ENV_TIMEOUT: &str = "SWIFT_TIMEOUT";
pub const ENV_SERVICENET: &str = "RACKSPACE_SERVICENET";

pub fn default_user_agent() -> String {
    concat!("swift-core/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionOptions {
    pub auth_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Applied to every auth, storage and CDN request.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Route storage traffic through the `snet-` host variant.
    #[serde(default)]
    pub servicenet: bool,
}

impl ConnectionOptions {
    pub fn new(auth_url: impl Into<String>) -> Self {
        Self {
            auth_url: auth_url.into(),
            user_agent: default_user_agent(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            servicenet: false,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_servicenet(mut self, servicenet: bool) -> Self {
        self.servicenet = servicenet;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(raw)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build options from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_url = lookup(ENV_AUTH_URL).unwrap_or_default();
        let mut options = Self::new(auth_url);
        if let Some(user_agent) = lookup(ENV_USER_AGENT).filter(|ua| !ua.is_empty()) {
            options.user_agent = user_agent;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            let secs: u64 = timeout.trim().parse().map_err(|_| {
                StorageError::InvalidArgument(format!("{ENV_TIMEOUT} must be whole seconds, got {timeout:?}"))
            })?;
            options.timeout_ms = secs.saturating_mul(1_000);
        }
        options.servicenet = lookup(ENV_SERVICENET).is_some();
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth_url.trim().is_empty() {
            return Err(StorageError::InvalidArgument(
                "an authentication URL is required".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(StorageError::InvalidArgument(
                "timeout must be at least one millisecond".to_string(),
            ));
        }
        Ok(())
    }
}
