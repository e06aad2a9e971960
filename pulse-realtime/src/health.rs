//! Application-level server health checks.
//!
//! A socket can stay open while the application behind it is broken, and a
//! socket can be down while the HTTP API is fine. The health probe checks the
//! HTTP side independently of the transport.

use async_trait::async_trait;
use pulse_core::error::NetworkError;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::RealtimeConfig;

/// Checks whether the application server is reachable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Runs one check. `Ok` means reachable.
    async fn check(&self) -> Result<(), NetworkError>;
}

/// Probe issuing `GET <origin><health_path>`; any 2xx status is healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl HttpHealthProbe {
    /// Creates a probe for the health endpoint configured in `config`.
    pub fn new(config: &RealtimeConfig) -> Result<Self, NetworkError> {
        let url = config.health_url()?;
        let client = Client::builder()
            .timeout(config.health_timeout())
            .build()
            .map_err(|e| NetworkError::ConnectionFailed {
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            url,
            timeout: config.health_timeout(),
        })
    }

    /// Endpoint being probed.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> Result<(), NetworkError> {
        let response = self.client.get(self.url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                }
            } else if e.is_connect() {
                NetworkError::ConnectionFailed {
                    reason: e.to_string(),
                }
            } else {
                NetworkError::Http {
                    status_code: e.status().map_or(0, |s| s.as_u16()),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        debug!(url = %self.url, status = status.as_u16(), "Health check response");
        if status.is_success() {
            Ok(())
        } else {
            Err(NetworkError::Http {
                status_code: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            })
        }
    }
}
