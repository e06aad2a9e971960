//! # Pulse Telemetry
//!
//! Logging, tracing and metrics for the Pulse real-time client.
//!
//! - Structured logging with JSON and pretty formats
//! - Rolling file output
//! - Masking of tokens and credentials before they reach a log line
//! - Span helpers for connection and event handling
//! - Prometheus metrics for connection and queue activity

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Logging configuration and initialization
pub mod logging;

/// Sensitive data masking
pub mod masking;

/// Span definitions
pub mod spans;

/// Metrics collection and export
pub mod metrics;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::logging::{LogConfig, LogFormat, LogOutput, init_logging};
    pub use crate::masking::{Sensitive, SensitiveDataMasker};
    pub use crate::metrics::{MetricsConfig, PulseMetrics, init_metrics};
    pub use crate::spans::*;
}
