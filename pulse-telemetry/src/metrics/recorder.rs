//! Pulse metrics recorder with pre-defined metrics.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Pre-defined metrics for the real-time client.
///
/// All metrics follow the naming convention: `pulse_<category>_<metric>`
pub struct PulseMetrics;

impl PulseMetrics {
    /// Register all metric descriptions.
    pub fn register() {
        // Connection metrics
        describe_gauge!(
            "pulse_realtime_connected",
            "Transport status (1=connected, 0=disconnected)"
        );
        describe_gauge!(
            "pulse_realtime_authenticated",
            "Session status (1=authenticated, 0=not authenticated)"
        );
        describe_counter!(
            "pulse_realtime_reconnection_total",
            "Total number of reconnect attempts"
        );
        describe_counter!(
            "pulse_realtime_auth_failure_total",
            "Total number of rejected handshakes"
        );
        describe_counter!(
            "pulse_realtime_event_received_total",
            "Total number of inbound events dispatched"
        );

        // Outbound queue metrics
        describe_counter!(
            "pulse_queue_enqueued_total",
            "Total number of events queued while offline"
        );
        describe_counter!(
            "pulse_queue_evicted_total",
            "Total number of queued events evicted by the size bound"
        );
        describe_counter!(
            "pulse_queue_expired_total",
            "Total number of queued events dropped after their TTL"
        );
        describe_gauge!("pulse_queue_depth", "Number of events waiting to be sent");
    }

    // ==================== Connection Metrics ====================

    /// Update transport connection status.
    pub fn connected(connected: bool) {
        gauge!("pulse_realtime_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Update session authentication status.
    pub fn authenticated(authenticated: bool) {
        gauge!("pulse_realtime_authenticated").set(if authenticated { 1.0 } else { 0.0 });
    }

    /// Record a reconnect attempt. `cause` names what ended the previous link.
    pub fn reconnection(cause: &str) {
        counter!(
            "pulse_realtime_reconnection_total",
            "cause" => cause.to_string()
        )
        .increment(1);
    }

    /// Record a rejected handshake.
    pub fn auth_failure() {
        counter!("pulse_realtime_auth_failure_total").increment(1);
    }

    /// Record an inbound event.
    pub fn event_received() {
        counter!("pulse_realtime_event_received_total").increment(1);
    }

    // ==================== Queue Metrics ====================

    /// Record an event entering the outbound queue.
    pub fn queue_enqueued() {
        counter!("pulse_queue_enqueued_total").increment(1);
    }

    /// Record events evicted by the size bound.
    pub fn queue_evicted(count: u64) {
        counter!("pulse_queue_evicted_total").increment(count);
    }

    /// Record events dropped after their TTL.
    pub fn queue_expired(count: u64) {
        counter!("pulse_queue_expired_total").increment(count);
    }

    /// Update the outbound queue depth.
    #[allow(clippy::cast_precision_loss)]
    pub fn queue_depth(depth: usize) {
        gauge!("pulse_queue_depth").set(depth as f64);
    }
}
