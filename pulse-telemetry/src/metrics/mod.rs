//! Metrics collection and export.
//!
//! Connection and outbound-queue metrics are recorded through the `metrics`
//! facade. Without an installed recorder every call is a no-op; the binary
//! installs a Prometheus exporter when [`MetricsConfig::enabled`] is set.

mod config;
mod recorder;

pub use config::MetricsConfig;
pub use recorder::PulseMetrics;

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Installs the Prometheus recorder and its scrape endpoint.
///
/// Does nothing when metrics are disabled. Must be called from inside a
/// tokio runtime, which hosts the HTTP listener.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .endpoint_address
        .parse()
        .map_err(|e| MetricsError::InvalidAddress(format!("{}: {e}", config.endpoint_address)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::InitializationFailed(e.to_string()))?;

    PulseMetrics::register();
    Ok(())
}

/// Errors that can occur during metrics initialization.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Invalid endpoint address
    #[error("Invalid endpoint address: {0}")]
    InvalidAddress(String),

    /// Initialization failed
    #[error("Metrics initialization failed: {0}")]
    InitializationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let config = MetricsConfig {
            enabled: true,
            endpoint_address: "not-an-address".to_string(),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(MetricsError::InvalidAddress(_))
        ));
    }
}
