//! Span helpers for the real-time client.

use tracing::{Span, debug_span, info_span};

/// Span covering one session (login to logout) for a user.
///
/// ```
/// use pulse_telemetry::spans::session_span;
///
/// let span = session_span("user-1", "org-9");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn session_span(user_id: &str, org_id: &str) -> Span {
    info_span!(
        "realtime.session",
        user_id = %user_id,
        org_id = %org_id,
        otel.kind = "client"
    )
}

/// Span covering one transport lifetime, from open to close.
#[must_use]
pub fn connection_span(url: &str, attempt: u32) -> Span {
    info_span!(
        "realtime.connection",
        url = %url,
        attempt = attempt,
        otel.kind = "client"
    )
}

/// Span around dispatching one inbound event to its handlers.
#[must_use]
pub fn dispatch_span(event: &str, handlers: usize) -> Span {
    debug_span!("realtime.dispatch", event = %event, handlers = handlers)
}

/// Span around one outbound queue flush.
#[must_use]
pub fn flush_span(queued: usize) -> Span {
    debug_span!("realtime.flush", queued = queued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_can_be_entered() {
        let session = session_span("u1", "o1");
        let _s = session.enter();
        let connection = connection_span("wss://crm.example.com/ws", 0);
        let _c = connection.enter();
        let _d = dispatch_span("lead:created", 2).entered();
        let _f = flush_span(3).entered();
    }
}
