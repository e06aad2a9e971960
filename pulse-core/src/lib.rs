//! # Pulse Core
//!
//! Shared building blocks for the Pulse real-time client.
//!
//! This crate provides:
//! - The error hierarchy used by every other Pulse crate
//! - Configuration loading with YAML/TOML/JSON support and environment variable overrides

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]

/// Error types and handling
pub mod error;

/// Configuration management
pub mod config;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigFormat, ConfigLoader, Configurable, Validatable};
    pub use crate::error::{
        AuthError, ConfigError, ErrorSeverity, NetworkError, ProtocolError, PulseError,
    };
}
