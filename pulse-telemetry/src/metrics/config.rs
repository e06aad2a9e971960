//! Metrics configuration types.

use serde::{Deserialize, Serialize};

/// Configuration for the metrics system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder at startup
    #[serde(default)]
    pub enabled: bool,

    /// Address the Prometheus scrape endpoint listens on
    #[serde(default = "default_endpoint_address")]
    pub endpoint_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_address: default_endpoint_address(),
        }
    }
}

fn default_endpoint_address() -> String {
    "127.0.0.1:9464".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.endpoint_address, "127.0.0.1:9464");
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: MetricsConfig = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.endpoint_address, "127.0.0.1:9464");
    }
}
