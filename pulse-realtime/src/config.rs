//! Real-time client configuration.

use pulse_core::config::{Configurable, Validatable, env_bool, env_parse, env_string};
use pulse_core::error::{ConfigError, NetworkError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Configuration for the real-time client.
///
/// Connection settings, reconnection policy, outbound queue bounds and
/// health-check cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// HTTP(S) origin of the application server, e.g. `https://crm.example.com`.
    /// The socket URL is derived from it (`https` → `wss`).
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path of the socket endpoint on the origin.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whether automatic reconnection is enabled.
    #[serde(default = "default_reconnect_enabled")]
    pub reconnect_enabled: bool,

    /// Maximum consecutive reconnection attempts before giving up (0 = unlimited).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Initial reconnection delay in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum reconnection delay in milliseconds.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Backoff multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Transport ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long to wait for a pong before declaring the transport dead.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,

    /// Outbound events older than this are discarded instead of replayed.
    #[serde(default = "default_queue_ttl_ms")]
    pub queue_ttl_ms: u64,

    /// Maximum number of outbound events buffered while disconnected.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Whether periodic application-level health checks run.
    #[serde(default = "default_health_check_enabled")]
    pub health_check_enabled: bool,

    /// Health check interval in milliseconds.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Health check request timeout in milliseconds.
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    /// Path of the health endpoint on the origin.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Consecutive rejected handshakes after which the session stops retrying.
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,

    /// Additional headers for the socket handshake request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_origin() -> String {
    "http://localhost:5000".to_string()
}

fn default_socket_path() -> String {
    "/ws".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_max_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_heartbeat_interval_ms() -> u64 {
    25_000
}

fn default_pong_timeout_ms() -> u64 {
    20_000
}

fn default_queue_ttl_ms() -> u64 {
    30_000
}

fn default_max_queue_size() -> usize {
    50
}

fn default_health_check_enabled() -> bool {
    true
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_health_timeout_ms() -> u64 {
    5_000
}

fn default_health_path() -> String {
    "/api/health".to_string()
}

fn default_max_auth_failures() -> u32 {
    3
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            socket_path: default_socket_path(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_enabled: default_reconnect_enabled(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            queue_ttl_ms: default_queue_ttl_ms(),
            max_queue_size: default_max_queue_size(),
            health_check_enabled: default_health_check_enabled(),
            health_check_interval_ms: default_health_check_interval_ms(),
            health_timeout_ms: default_health_timeout_ms(),
            health_path: default_health_path(),
            max_auth_failures: default_max_auth_failures(),
            headers: HashMap::new(),
        }
    }
}

impl RealtimeConfig {
    /// Creates a new builder for `RealtimeConfig`.
    #[must_use]
    pub fn builder() -> RealtimeConfigBuilder {
        RealtimeConfigBuilder::default()
    }

    /// Returns the connection timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the heartbeat interval as a Duration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Returns the pong timeout as a Duration.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Returns the outbound queue TTL as a Duration.
    #[must_use]
    pub fn queue_ttl(&self) -> Duration {
        Duration::from_millis(self.queue_ttl_ms)
    }

    /// Returns the health check interval as a Duration.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Returns the health check timeout as a Duration.
    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Calculates the reconnect delay for a given attempt using exponential backoff.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn calculate_reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.reconnect_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped_delay = delay.min(self.max_reconnect_delay_ms as f64) as u64;
        Duration::from_millis(capped_delay)
    }

    /// Returns whether another reconnection attempt is allowed after
    /// `attempt` attempts have already been made.
    #[must_use]
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        self.reconnect_enabled
            && (self.max_reconnect_attempts == 0 || attempt < self.max_reconnect_attempts)
    }

    fn parsed_origin(&self) -> Result<Url, NetworkError> {
        Url::parse(&self.origin).map_err(|e| NetworkError::InvalidUrl {
            url: self.origin.clone(),
            reason: e.to_string(),
        })
    }

    /// Builds the socket URL from the origin, upgrading to `wss` when the
    /// origin itself is served over `https`.
    pub fn socket_url(&self) -> Result<Url, NetworkError> {
        let mut url = self.parsed_origin()?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(NetworkError::InvalidUrl {
                    url: self.origin.clone(),
                    reason: format!("unsupported scheme '{other}'"),
                });
            }
        };
        url.set_scheme(scheme).map_err(|()| NetworkError::InvalidUrl {
            url: self.origin.clone(),
            reason: format!("cannot switch scheme to '{scheme}'"),
        })?;
        url.set_path(&self.socket_path);
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Builds the health-check URL on the origin.
    pub fn health_url(&self) -> Result<Url, NetworkError> {
        let origin = self.parsed_origin()?;
        origin
            .join(&self.health_path)
            .map_err(|e| NetworkError::InvalidUrl {
                url: format!("{}{}", self.origin, self.health_path),
                reason: e.to_string(),
            })
    }
}

impl Validatable for RealtimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.origin.trim().is_empty() {
            return Err(ConfigError::missing_field_in_section("origin", "realtime"));
        }
        self.socket_url()
            .map_err(|e| ConfigError::invalid_value("realtime.origin", e.to_string()))?;
        if !self.socket_path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "realtime.socket_path",
                "must start with '/'",
            ));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::invalid_value(
                "realtime.max_queue_size",
                "must be at least 1",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid_value(
                "realtime.backoff_multiplier",
                "must be >= 1.0",
            ));
        }
        if self.reconnect_delay_ms > self.max_reconnect_delay_ms {
            return Err(ConfigError::invalid_value(
                "realtime.reconnect_delay_ms",
                "must not exceed max_reconnect_delay_ms",
            ));
        }
        if self.health_check_enabled && self.health_check_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "realtime.health_check_interval_ms",
                "must be positive when health checks are enabled",
            ));
        }
        if self.max_auth_failures == 0 {
            return Err(ConfigError::invalid_value(
                "realtime.max_auth_failures",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Configurable for RealtimeConfig {
    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let var = |name: &str| format!("{prefix}_REALTIME_{name}");

        if let Some(origin) = env_string(&var("ORIGIN")) {
            self.origin = origin;
        }
        if let Some(path) = env_string(&var("SOCKET_PATH")) {
            self.socket_path = path;
        }
        if let Some(enabled) = env_bool(&var("RECONNECT_ENABLED"))? {
            self.reconnect_enabled = enabled;
        }
        if let Some(attempts) = env_parse(&var("MAX_RECONNECT_ATTEMPTS"))? {
            self.max_reconnect_attempts = attempts;
        }
        if let Some(ttl) = env_parse(&var("QUEUE_TTL_MS"))? {
            self.queue_ttl_ms = ttl;
        }
        if let Some(size) = env_parse(&var("MAX_QUEUE_SIZE"))? {
            self.max_queue_size = size;
        }
        if let Some(enabled) = env_bool(&var("HEALTH_CHECK_ENABLED"))? {
            self.health_check_enabled = enabled;
        }
        if let Some(interval) = env_parse(&var("HEALTH_CHECK_INTERVAL_MS"))? {
            self.health_check_interval_ms = interval;
        }
        Ok(())
    }

    fn env_var_names(prefix: &str) -> Vec<String> {
        [
            "ORIGIN",
            "SOCKET_PATH",
            "RECONNECT_ENABLED",
            "MAX_RECONNECT_ATTEMPTS",
            "QUEUE_TTL_MS",
            "MAX_QUEUE_SIZE",
            "HEALTH_CHECK_ENABLED",
            "HEALTH_CHECK_INTERVAL_MS",
        ]
        .iter()
        .map(|name| format!("{prefix}_REALTIME_{name}"))
        .collect()
    }
}

/// Builder for `RealtimeConfig`.
#[derive(Debug, Default)]
pub struct RealtimeConfigBuilder {
    config: Option<RealtimeConfig>,
}

impl RealtimeConfigBuilder {
    fn config(&mut self) -> &mut RealtimeConfig {
        self.config.get_or_insert_with(RealtimeConfig::default)
    }

    /// Sets the application origin.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.config().origin = origin.into();
        self
    }

    /// Sets the socket path.
    #[must_use]
    pub fn socket_path(mut self, path: impl Into<String>) -> Self {
        self.config().socket_path = path.into();
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config().connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets whether reconnection is enabled.
    #[must_use]
    pub fn reconnect_enabled(mut self, enabled: bool) -> Self {
        self.config().reconnect_enabled = enabled;
        self
    }

    /// Sets the maximum reconnection attempts.
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config().max_reconnect_attempts = attempts;
        self
    }

    /// Sets the initial reconnection delay.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config().reconnect_delay_ms = duration_ms(delay);
        self
    }

    /// Sets the maximum reconnection delay.
    #[must_use]
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config().max_reconnect_delay_ms = duration_ms(delay);
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config().backoff_multiplier = multiplier;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config().heartbeat_interval_ms = duration_ms(interval);
        self
    }

    /// Sets how long a ping may go unanswered.
    #[must_use]
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.config().pong_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the outbound queue TTL.
    #[must_use]
    pub fn queue_ttl(mut self, ttl: Duration) -> Self {
        self.config().queue_ttl_ms = duration_ms(ttl);
        self
    }

    /// Sets the outbound queue bound.
    #[must_use]
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config().max_queue_size = size;
        self
    }

    /// Enables or disables periodic health checks.
    #[must_use]
    pub fn health_check_enabled(mut self, enabled: bool) -> Self {
        self.config().health_check_enabled = enabled;
        self
    }

    /// Sets the health check interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config().health_check_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the health endpoint path.
    #[must_use]
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.config().health_path = path.into();
        self
    }

    /// Sets how many rejected handshakes end the session.
    #[must_use]
    pub fn max_auth_failures(mut self, failures: u32) -> Self {
        self.config().max_auth_failures = failures;
        self
    }

    /// Adds a handshake header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config().headers.insert(key.into(), value.into());
        self
    }

    /// Builds the `RealtimeConfig`.
    #[must_use]
    pub fn build(self) -> RealtimeConfig {
        self.config.unwrap_or_default()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
