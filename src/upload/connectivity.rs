//! Reachability checks run before each upload.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::UploadConfig;

/// Answers whether the collection service can be reached right now.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns `true` if an upload is worth attempting.
    async fn is_reachable(&self) -> bool;
}

/// Probe that opens a TCP connection to the service endpoint.
#[derive(Debug, Clone)]
pub struct TcpReachability {
    target: String,
    timeout: Duration,
}

impl TcpReachability {
    /// Probe `host:port`, giving up after `timeout`.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            target: format!("{}:{}", host.into(), port),
            timeout,
        }
    }

    /// Probe the endpoint named by an upload configuration.
    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.port,
            config.connectivity_timeout(),
        )
    }

    /// Address being probed.
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl ConnectivityProbe for TcpReachability {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("{} unreachable: {}", self.target, e);
                false
            }
            Err(_) => {
                debug!("{} unreachable: timed out after {:?}", self.target, self.timeout);
                false
            }
        }
    }
}
