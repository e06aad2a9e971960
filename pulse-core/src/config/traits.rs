//! Configuration traits for validation and environment overrides.

use crate::error::ConfigError;

/// Trait for types that can be validated.
///
/// ```rust
/// use pulse_core::config::Validatable;
/// use pulse_core::error::ConfigError;
///
/// struct QueueConfig {
///     max_size: usize,
/// }
///
/// impl Validatable for QueueConfig {
///     fn validate(&self) -> Result<(), ConfigError> {
///         if self.max_size == 0 {
///             return Err(ConfigError::invalid_value("max_size", "must be at least 1"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Validatable {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Trait for types that support environment variable overrides.
///
/// Variables are named `<PREFIX>_<SECTION>_<FIELD>` in upper case, e.g.
/// `PULSE_REALTIME_ORIGIN`.
pub trait Configurable: Sized {
    /// Applies environment variable overrides to the configuration.
    ///
    /// Unparseable values are reported rather than silently ignored.
    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError>;

    /// Returns the environment variable names that can override this configuration.
    fn env_var_names(prefix: &str) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestConfig {
        value: i32,
    }

    impl Validatable for TestConfig {
        fn validate(&self) -> Result<(), ConfigError> {
            if self.value < 0 {
                return Err(ConfigError::invalid_value(
                    "value",
                    "Value must be non-negative",
                ));
            }
            Ok(())
        }
    }

    #[test]
    fn test_validatable_success() {
        let config = TestConfig { value: 10 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validatable_failure() {
        let config = TestConfig { value: -1 };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("value"));
    }
}
