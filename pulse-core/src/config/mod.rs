//! Configuration management module.
//!
//! - YAML, TOML and JSON configuration files
//! - Validation with descriptive error messages
//! - Environment variable overrides
//!
//! # Example
//!
//! ```rust,ignore
//! use pulse_core::config::{ConfigLoader, ConfigFormat};
//!
//! let config: MyConfig = ConfigLoader::new()
//!     .with_env_prefix("PULSE")
//!     .load_file("pulse.yaml")?;
//! ```

mod env;
mod loader;
mod traits;

pub use env::{env_bool, env_parse, env_string};
pub use loader::{ConfigFormat, ConfigLoader};
pub use traits::{Configurable, Validatable};
