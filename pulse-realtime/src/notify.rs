//! User-facing notifications for connection transitions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::state::{ConnectionState, ConnectionStatus, ServerReachability};

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Neutral information.
    Info,
    /// Something recovered.
    Success,
    /// Degraded but usable.
    Warning,
    /// Needs attention.
    Error,
}

/// A toast-style notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Short title.
    pub title: String,
    /// Longer explanation.
    pub description: String,
    /// Severity.
    pub severity: Severity,
}

impl Notification {
    /// Creates a notification.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }
}

/// Sink for notifications (a toast UI, a log, a test recorder).
pub trait Notifier: Send + Sync {
    /// Shows one notification.
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        match n.severity {
            Severity::Info | Severity::Success => {
                info!(title = %n.title, description = %n.description, "Notification");
            }
            Severity::Warning => {
                warn!(title = %n.title, description = %n.description, "Notification");
            }
            Severity::Error => {
                error!(title = %n.title, description = %n.description, "Notification");
            }
        }
    }
}

#[derive(Debug, Default)]
struct Raised {
    realtime_lost: bool,
    server_down: bool,
    auth_failed: bool,
}

/// Turns status snapshots into one notification per transition.
///
/// Repeated snapshots in the same condition stay silent; a "restored"
/// notification is only sent if the matching failure was shown.
pub struct TransitionNotifier {
    inner: Arc<dyn Notifier>,
    raised: Mutex<Raised>,
}

impl std::fmt::Debug for TransitionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionNotifier")
            .field("raised", &*self.raised.lock())
            .finish_non_exhaustive()
    }
}

impl TransitionNotifier {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn Notifier>) -> Self {
        Self {
            inner,
            raised: Mutex::new(Raised::default()),
        }
    }

    /// Inspects a snapshot and emits whatever notifications it implies.
    pub fn observe(&self, status: &ConnectionStatus) {
        let mut pending = Vec::new();
        {
            let mut raised = self.raised.lock();

            match status.state {
                ConnectionState::Failed if !raised.realtime_lost => {
                    raised.realtime_lost = true;
                    pending.push(Notification::new(
                        "Real-time updates unavailable",
                        "Lost connection to the server. Data may be out of date until it reconnects.",
                        Severity::Warning,
                    ));
                }
                ConnectionState::Connected | ConnectionState::Authenticated
                    if raised.realtime_lost =>
                {
                    raised.realtime_lost = false;
                    pending.push(Notification::new(
                        "Real-time updates restored",
                        "Live updates are flowing again.",
                        Severity::Success,
                    ));
                }
                _ => {}
            }

            match status.state {
                ConnectionState::AuthFailed if !raised.auth_failed => {
                    raised.auth_failed = true;
                    let reason = status
                        .auth_error
                        .as_ref()
                        .map_or_else(|| "authentication failed".to_string(), ToString::to_string);
                    pending.push(Notification::new(
                        "Real-time authentication failed",
                        reason,
                        Severity::Error,
                    ));
                }
                ConnectionState::Authenticated => raised.auth_failed = false,
                _ => {}
            }

            match status.server {
                ServerReachability::Unreachable if !raised.server_down => {
                    raised.server_down = true;
                    pending.push(Notification::new(
                        "Server unreachable",
                        "The application server is not responding.",
                        Severity::Error,
                    ));
                }
                ServerReachability::Reachable if raised.server_down => {
                    raised.server_down = false;
                    pending.push(Notification::new(
                        "Server connection restored",
                        "The application server is responding again.",
                        Severity::Success,
                    ));
                }
                _ => {}
            }
        }

        for notification in pending {
            self.inner.notify(notification);
        }
    }

    /// Forgets raised conditions, e.g. after the session ended.
    pub fn reset(&self) {
        *self.raised.lock() = Raised::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;
    use pulse_core::error::AuthError;

    fn status(state: ConnectionState) -> ConnectionStatus {
        let mut status = ConnectionStatus::default();
        status.set_state(state);
        status
    }

    #[test]
    fn test_failed_notifies_once_then_restores() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier = TransitionNotifier::new(recorder.clone());

        notifier.observe(&status(ConnectionState::Failed));
        notifier.observe(&status(ConnectionState::Failed));
        notifier.observe(&status(ConnectionState::Reconnecting));
        notifier.observe(&status(ConnectionState::Connected));
        notifier.observe(&status(ConnectionState::Authenticated));

        let titles = recorder.titles();
        assert_eq!(
            titles,
            vec!["Real-time updates unavailable", "Real-time updates restored"]
        );
        assert_eq!(recorder.notifications()[0].severity, Severity::Warning);
    }

    #[test]
    fn test_no_restored_without_failure() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier = TransitionNotifier::new(recorder.clone());

        notifier.observe(&status(ConnectionState::Connected));
        notifier.observe(&ConnectionStatus {
            server: ServerReachability::Reachable,
            ..status(ConnectionState::Authenticated)
        });
        assert!(recorder.titles().is_empty());
    }

    #[test]
    fn test_server_reachability_transitions() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier = TransitionNotifier::new(recorder.clone());
        let mut snapshot = status(ConnectionState::Authenticated);

        snapshot.server = ServerReachability::Unreachable;
        notifier.observe(&snapshot);
        notifier.observe(&snapshot);
        snapshot.server = ServerReachability::Reachable;
        notifier.observe(&snapshot);

        assert_eq!(
            recorder.titles(),
            vec!["Server unreachable", "Server connection restored"]
        );
        assert_eq!(recorder.notifications()[0].severity, Severity::Error);
    }

    #[test]
    fn test_auth_failure_once_per_streak() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier = TransitionNotifier::new(recorder.clone());
        let mut failed = status(ConnectionState::AuthFailed);
        failed.auth_error = Some(AuthError::rejected(Some("bad token")));

        notifier.observe(&failed);
        notifier.observe(&failed);
        notifier.observe(&status(ConnectionState::Authenticated));
        notifier.observe(&failed);

        let notifications = recorder.notifications();
        assert_eq!(notifications.len(), 2);
        assert!(notifications[0].description.contains("bad token"));
        assert_eq!(notifications[0].severity, Severity::Error);
    }
}
