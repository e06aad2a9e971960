//! Top-level configuration for the `pulse` binary.

use std::path::Path;

use pulse_core::config::{ConfigLoader, Configurable, Validatable, env_bool, env_string};
use pulse_core::error::ConfigError;
use pulse_realtime::RealtimeConfig;
use pulse_telemetry::logging::LogConfig;
use pulse_telemetry::metrics::MetricsConfig;
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PULSE";

/// Everything the binary reads from `pulse.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Real-time client settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LogConfig,

    /// Metrics export settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl PulseConfig {
    /// Loads defaults, the file at `path` if it exists, then `PULSE_*`
    /// overrides, and validates the result.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        ConfigLoader::new()
            .with_env_prefix(ENV_PREFIX)
            .load_layered(Some(path))
    }
}

impl Validatable for PulseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.realtime.validate()?;
        if self.logging.outputs.is_empty() {
            return Err(ConfigError::invalid_value(
                "logging.outputs",
                "at least one output is required",
            ));
        }
        Ok(())
    }
}

impl Configurable for PulseConfig {
    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        self.realtime.apply_env_overrides(prefix)?;
        if let Some(level) = env_string(&format!("{prefix}_LOG_LEVEL")) {
            self.logging.level = level;
        }
        if let Some(enabled) = env_bool(&format!("{prefix}_METRICS_ENABLED"))? {
            self.metrics.enabled = enabled;
        }
        if let Some(address) = env_string(&format!("{prefix}_METRICS_ADDRESS")) {
            self.metrics.endpoint_address = address;
        }
        Ok(())
    }

    fn env_var_names(prefix: &str) -> Vec<String> {
        let mut names = RealtimeConfig::env_var_names(prefix);
        names.push(format!("{prefix}_LOG_LEVEL"));
        names.push(format!("{prefix}_METRICS_ENABLED"));
        names.push(format!("{prefix}_METRICS_ADDRESS"));
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PulseConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.realtime.max_queue_size, 50);
        assert_eq!(config.logging.level, "info");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_yaml_file_is_loaded() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "realtime:\n  origin: https://crm.example.com\n  max_queue_size: 10\n\
             logging:\n  level: debug\n\
             metrics:\n  enabled: true"
        )
        .unwrap();

        let config = PulseConfig::load(file.path()).unwrap();
        assert_eq!(config.realtime.origin, "https://crm.example.com");
        assert_eq!(config.realtime.max_queue_size, 10);
        assert_eq!(config.logging.level, "debug");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.endpoint_address, "127.0.0.1:9464");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "realtime:\n  max_queue_size: 0").unwrap();
        assert!(PulseConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_env_var_names_cover_logging() {
        let names = PulseConfig::env_var_names(ENV_PREFIX);
        assert!(names.contains(&"PULSE_REALTIME_ORIGIN".to_string()));
        assert!(names.contains(&"PULSE_LOG_LEVEL".to_string()));
        assert!(names.contains(&"PULSE_METRICS_ENABLED".to_string()));
    }
}
