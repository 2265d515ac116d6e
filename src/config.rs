//! Configuration for the device controller and upload pipeline.
//!
//! Values are supplied by the embedding application; nothing here reads
//! files or the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ble::scanner::DEFAULT_SCAN_WINDOW;
use crate::error::{Error, Result};

/// Default upload service port.
pub const DEFAULT_SERVICE_PORT: u16 = 8081;

/// Controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// How long a scan runs before giving up on the configured peripheral.
    pub scan_window: Duration,
    /// Passed through to the radio's connect call.
    pub auto_connect: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scan_window: DEFAULT_SCAN_WINDOW,
            auto_connect: false,
        }
    }
}

/// Upload service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Service host name.
    pub host: String,
    /// Service port.
    pub port: u16,
    /// API key sent with every request.
    pub api_key: String,
    /// Use HTTPS instead of plain HTTP.
    pub use_tls: bool,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Grace period for in-flight uploads on close, in milliseconds.
    pub close_grace_ms: u64,
    /// Upper bound on a connectivity check, in milliseconds.
    pub connectivity_timeout_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SERVICE_PORT,
            api_key: String::new(),
            use_tls: false,
            request_timeout_secs: 10,
            close_grace_ms: 1000,
            connectivity_timeout_ms: 2000,
        }
    }
}

impl UploadConfig {
    /// Create a configuration for the given host and API key.
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid TOML or the host is empty.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidParameter {
                name: "port".to_string(),
                value: self.port.to_string(),
            });
        }
        Ok(())
    }

    /// Base URL of the service.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Grace period for in-flight uploads on close.
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Upper bound on a connectivity check.
    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity_timeout_ms)
    }
}
